use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::ProviderError;
use crate::gateway::{Completion, CompletionRequest, LLMGateway};

/// Pre-programmed gateway reply
#[derive(Debug, Clone)]
pub enum ScriptedResponse {
    Completion(Completion),
    Error(ProviderError),
    /// Wait, then yield the inner response
    Delay(Duration, Box<ScriptedResponse>),
}

impl ScriptedResponse {
    pub fn message(content: impl Into<String>) -> Self {
        Self::Completion(Completion::message(content))
    }

    pub fn tool_calls(calls: Vec<stride_types::ToolCall>) -> Self {
        Self::Completion(Completion::tool_calls(calls))
    }

    pub fn delayed(delay: Duration, inner: ScriptedResponse) -> Self {
        Self::Delay(delay, Box::new(inner))
    }
}

/// Gateway that replays canned completions in order, for tests and offline
/// demos. Every request is recorded.
pub struct ScriptedGateway {
    responses: Mutex<VecDeque<ScriptedResponse>>,
    fallback: Option<ScriptedResponse>,
    requests: Mutex<Vec<CompletionRequest>>,
    call_count: AtomicUsize,
}

impl ScriptedGateway {
    pub fn new(responses: Vec<ScriptedResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            fallback: None,
            requests: Mutex::new(Vec::new()),
            call_count: AtomicUsize::new(0),
        }
    }

    /// Reply used once the queue is drained
    pub fn with_fallback(mut self, fallback: ScriptedResponse) -> Self {
        self.fallback = Some(fallback);
        self
    }

    pub fn push(&self, response: ScriptedResponse) {
        if let Ok(mut queue) = self.responses.lock() {
            queue.push_back(response);
        }
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::Relaxed)
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    fn next_response(&self) -> Option<ScriptedResponse> {
        let next = self.responses.lock().ok().and_then(|mut q| q.pop_front());
        next.or_else(|| self.fallback.clone())
    }
}

#[async_trait]
impl LLMGateway for ScriptedGateway {
    async fn complete(&self, request: CompletionRequest) -> Result<Completion, ProviderError> {
        let idx = self.call_count.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request);
        }

        let mut response = self.next_response().ok_or_else(|| {
            ProviderError::Transport(format!("no scripted response for call {idx}"))
        })?;

        loop {
            match response {
                ScriptedResponse::Completion(completion) => return Ok(completion),
                ScriptedResponse::Error(err) => return Err(err),
                ScriptedResponse::Delay(delay, inner) => {
                    tokio::time::sleep(delay).await;
                    response = *inner;
                }
            }
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }
}
