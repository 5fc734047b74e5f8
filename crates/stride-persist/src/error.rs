use stride_types::{StepFrozen, TransitionError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PersistError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("thread {thread_id} already has active run {run_id}")]
    ActiveRunExists { thread_id: String, run_id: String },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[cfg(feature = "mongodb")]
    #[error("Database error: {0}")]
    Database(#[from] mongodb::error::Error),

    #[cfg(feature = "mongodb")]
    #[error("BSON serialization error: {0}")]
    BsonSerialization(#[from] bson::ser::Error),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl PersistError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }
}

impl From<TransitionError> for PersistError {
    fn from(err: TransitionError) -> Self {
        Self::Conflict(err.to_string())
    }
}

impl From<StepFrozen> for PersistError {
    fn from(err: StepFrozen) -> Self {
        Self::Conflict(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PersistError>;
