use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::ProviderError;
use crate::gateway::{Completion, CompletionRequest, LLMGateway};

/// Bounded retry for transient provider errors. `max_retries = 0` disables it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_retries: u32,
    #[serde(with = "duration_millis")]
    pub base_delay: Duration,
    #[serde(with = "duration_millis")]
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (0-based). A server hint wins but
    /// is still capped.
    pub fn delay_for(&self, attempt: u32, suggested: Option<Duration>) -> Duration {
        let delay = suggested.unwrap_or_else(|| {
            self.base_delay
                .saturating_mul(2u32.saturating_pow(attempt.min(16)))
        });
        delay.min(self.max_delay)
    }
}

/// Wraps a gateway with exponential backoff on rate limits and timeouts
pub struct RetryingGateway {
    inner: Arc<dyn LLMGateway>,
    policy: RetryPolicy,
    total_retries: AtomicU64,
}

impl RetryingGateway {
    pub fn new(inner: Arc<dyn LLMGateway>, policy: RetryPolicy) -> Self {
        Self {
            inner,
            policy,
            total_retries: AtomicU64::new(0),
        }
    }

    pub fn total_retries(&self) -> u64 {
        self.total_retries.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl LLMGateway for RetryingGateway {
    async fn complete(&self, request: CompletionRequest) -> Result<Completion, ProviderError> {
        let mut attempt = 0;

        loop {
            match self.inner.complete(request.clone()).await {
                Ok(completion) => return Ok(completion),
                Err(err) if err.is_transient() && attempt < self.policy.max_retries => {
                    let delay = self.policy.delay_for(attempt, err.retry_after());
                    warn!(
                        provider = self.inner.name(),
                        attempt = attempt + 1,
                        max_retries = self.policy.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "transient provider error, retrying"
                    );
                    self.total_retries.fetch_add(1, Ordering::Relaxed);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}

mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
