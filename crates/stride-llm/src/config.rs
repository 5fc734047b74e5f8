// Configuration layer for provider-agnostic gateway creation

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ProviderError;
use crate::gateway::LLMGateway;
use crate::openai::OpenAIGateway;
use crate::retry::{RetryPolicy, RetryingGateway};

fn default_timeout() -> Duration {
    Duration::from_secs(60)
}

/// Configuration for the OpenAI provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAIConfig {
    pub api_key: String,
    /// Defaults to https://api.openai.com/v1
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default = "default_timeout", with = "duration_secs")]
    pub timeout: Duration,
}

impl OpenAIConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: None,
            timeout: default_timeout(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Provider-specific configuration details
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ProviderDetails {
    OpenAI(OpenAIConfig),
}

/// Complete provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(flatten)]
    pub details: ProviderDetails,
    #[serde(default)]
    pub retry: RetryPolicy,
}

impl ProviderConfig {
    pub fn openai(config: OpenAIConfig) -> Self {
        Self {
            details: ProviderDetails::OpenAI(config),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

/// Factory for creating gateways from configuration
pub struct GatewayFactory;

impl GatewayFactory {
    /// Build the provider gateway, wrapped in retry when the policy allows any
    pub fn create_gateway(config: ProviderConfig) -> Result<Arc<dyn LLMGateway>, ProviderError> {
        let inner: Arc<dyn LLMGateway> = match config.details {
            ProviderDetails::OpenAI(openai_config) => Arc::new(OpenAIGateway::new(openai_config)?),
        };

        if config.retry.max_retries == 0 {
            Ok(inner)
        } else {
            Ok(Arc::new(RetryingGateway::new(inner, config.retry)))
        }
    }
}

pub(crate) mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}
