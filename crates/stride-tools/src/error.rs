use stride_llm::ProviderError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ToolError {
    #[error("Tool '{0}' not found")]
    UnknownTool(String),

    #[error("Tool '{0}' registered twice")]
    DuplicateTool(String),

    #[error("Invalid arguments for '{tool}': {reason}")]
    InvalidArguments { tool: String, reason: String },

    #[error("Script not found: {0}")]
    ScriptNotFound(String),

    #[error("Script store error: {0}")]
    ScriptStore(String),

    #[error("Tool execution failed: {0}")]
    Execution(String),

    #[error(transparent)]
    Provider(#[from] ProviderError),
}

impl ToolError {
    pub fn invalid(tool: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidArguments {
            tool: tool.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ToolError>;
