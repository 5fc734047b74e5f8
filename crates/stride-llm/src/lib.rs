pub mod config;
pub mod error;
pub mod gateway;
pub mod openai;
pub mod retry;
pub mod scripted;
pub mod types;

pub use config::{GatewayFactory, OpenAIConfig, ProviderConfig, ProviderDetails};
pub use error::ProviderError;
pub use gateway::{Completion, CompletionRequest, LLMGateway};
pub use openai::OpenAIGateway;
pub use retry::{RetryPolicy, RetryingGateway};
pub use scripted::{ScriptedGateway, ScriptedResponse};
pub use types::{ChatMessage, Tool, ToolChoice};
