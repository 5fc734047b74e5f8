use stride_persist::PersistError;
use stride_tools::ToolError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("{0}")]
    NotFound(String),

    #[error("thread {thread_id} already has an active run ({run_id})")]
    ActiveRun { thread_id: String, run_id: String },

    #[error("Conflict: {0}")]
    Conflict(String),

    /// Request is well-formed but not allowed in the run's current state
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Request failed validation before anything was persisted
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Engine setup error: {0}")]
    Setup(String),

    #[error("Storage error: {0}")]
    Store(String),
}

impl From<PersistError> for EngineError {
    fn from(err: PersistError) -> Self {
        match err {
            PersistError::NotFound { .. } => Self::NotFound(err.to_string()),
            PersistError::ActiveRunExists { thread_id, run_id } => {
                Self::ActiveRun { thread_id, run_id }
            }
            PersistError::Conflict(msg) => Self::Conflict(msg),
            other => Self::Store(other.to_string()),
        }
    }
}

impl From<ToolError> for EngineError {
    fn from(err: ToolError) -> Self {
        Self::Validation(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
