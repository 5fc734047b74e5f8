// OpenAI chat-completions gateway

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE, RETRY_AFTER};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::config::OpenAIConfig;
use crate::error::ProviderError;
use crate::gateway::{Completion, CompletionRequest, LLMGateway};
use crate::types::{ChatMessage, Tool, ToolCall, ToolChoice};

pub const OPENAI_API_BASE: &str = "https://api.openai.com/v1";

/// OpenAI gateway (HTTP direct, no SDK)
pub struct OpenAIGateway {
    http_client: reqwest::Client,
    base_url: String,
}

impl OpenAIGateway {
    pub fn new(config: OpenAIConfig) -> Result<Self, ProviderError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", config.api_key))
                .map_err(|_| ProviderError::Auth("invalid API key format".to_string()))?,
        );

        let http_client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(config.timeout)
            .build()
            .map_err(|e| ProviderError::Transport(format!("failed to create HTTP client: {e}")))?;

        let base_url = config
            .base_url
            .unwrap_or_else(|| OPENAI_API_BASE.to_string())
            .trim_end_matches('/')
            .to_string();

        Ok(Self {
            http_client,
            base_url,
        })
    }

    /// Build chat completion request payload
    fn build_payload(&self, request: &CompletionRequest) -> Value {
        let mut messages = Vec::with_capacity(request.messages.len() + 1);
        if !request.instructions.is_empty() {
            messages.push(ChatMessage::system(request.instructions.clone()));
        }
        messages.extend(request.messages.iter().cloned());

        let mut payload = json!({
            "model": request.model,
            "messages": messages,
        });

        // o1 and gpt-5 use different parameter names and reject temperature
        let is_reasoning_model = request.model.starts_with("o1") || request.model.starts_with("gpt-5");

        if let Some(obj) = payload.as_object_mut() {
            if let Some(temp) = request.temperature {
                if !is_reasoning_model {
                    obj.insert("temperature".to_string(), json!(temp));
                }
            }
            if let Some(max_tokens) = request.max_tokens {
                let token_field = if is_reasoning_model {
                    "max_completion_tokens"
                } else {
                    "max_tokens"
                };
                obj.insert(token_field.to_string(), json!(max_tokens));
            }
            if !request.tools.is_empty() {
                let tools: Vec<Tool> = request.tools.iter().map(Tool::from).collect();
                obj.insert("tools".to_string(), json!(tools));
                obj.insert("tool_choice".to_string(), json!(ToolChoice::Auto));
            }
        }

        payload
    }

    async fn error_from_response(response: reqwest::Response) -> ProviderError {
        let status = response.status();
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs);
        let body = response.text().await.unwrap_or_default();
        let message = format!("OpenAI API error ({status}): {body}");

        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ProviderError::Auth(message),
            StatusCode::TOO_MANY_REQUESTS => ProviderError::RateLimited {
                message,
                retry_after,
            },
            StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => {
                ProviderError::Timeout(message)
            }
            s if s.is_client_error() => ProviderError::InvalidRequest(message),
            _ => ProviderError::Transport(message),
        }
    }
}

#[async_trait]
impl LLMGateway for OpenAIGateway {
    async fn complete(&self, request: CompletionRequest) -> Result<Completion, ProviderError> {
        let payload = self.build_payload(&request);
        debug!(model = %request.model, messages = request.messages.len(), tools = request.tools.len(), "sending chat completion");

        let response = self
            .http_client
            .post(format!("{}/chat/completions", self.base_url))
            .json(&payload)
            .send()
            .await?;

        if !response.status().is_success() {
            let err = Self::error_from_response(response).await;
            warn!(error = %err, "chat completion failed");
            return Err(err);
        }

        let body = response.text().await?;
        let raw: OpenAIChatResponse = serde_json::from_str(&body)
            .map_err(|e| ProviderError::MalformedResponse(format!("failed to parse response: {e}")))?;

        let choice = raw
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::MalformedResponse("response has no choices".to_string()))?;

        if let Some(usage) = &raw.usage {
            debug!(
                prompt_tokens = usage.prompt_tokens,
                completion_tokens = usage.completion_tokens,
                finish_reason = ?choice.finish_reason,
                "chat completion received"
            );
        }

        match (choice.message.tool_calls, choice.message.content) {
            (Some(calls), _) if !calls.is_empty() => Ok(Completion::tool_calls(
                calls.into_iter().map(Into::into).collect(),
            )),
            (_, Some(content)) => Ok(Completion::message(content)),
            _ => Err(ProviderError::MalformedResponse(
                "choice carries neither content nor tool calls".to_string(),
            )),
        }
    }

    fn name(&self) -> &str {
        "openai"
    }
}

// ============================================================================
// OPENAI-SPECIFIC RESPONSE TYPES (for Chat Completions)
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
struct OpenAIChatResponse {
    pub choices: Vec<Choice>,
    #[serde(default)]
    pub usage: Option<Usage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Choice {
    pub message: ResponseMessage,
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ResponseMessage {
    pub content: Option<String>,
    pub tool_calls: Option<Vec<ToolCall>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}
