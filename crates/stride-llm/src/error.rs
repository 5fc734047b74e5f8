use std::time::Duration;

use stride_types::{RunError, RunErrorCode};
use thiserror::Error;

/// Failure talking to the language-model provider
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProviderError {
    #[error("rate limited by provider: {message}")]
    RateLimited {
        message: String,
        retry_after: Option<Duration>,
    },

    #[error("provider rejected credentials: {0}")]
    Auth(String),

    #[error("malformed provider response: {0}")]
    MalformedResponse(String),

    #[error("provider request timed out: {0}")]
    Timeout(String),

    #[error("provider rejected request: {0}")]
    InvalidRequest(String),

    #[error("provider transport error: {0}")]
    Transport(String),
}

impl ProviderError {
    /// Rate limits and timeouts are the only errors worth retrying
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::RateLimited { .. } | Self::Timeout(_))
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    pub fn code(&self) -> RunErrorCode {
        match self {
            Self::RateLimited { .. } => RunErrorCode::RateLimitExceeded,
            Self::Auth(_) => RunErrorCode::AuthenticationFailed,
            Self::MalformedResponse(_) => RunErrorCode::MalformedResponse,
            Self::Timeout(_) => RunErrorCode::ProviderTimeout,
            Self::InvalidRequest(_) | Self::Transport(_) => RunErrorCode::ProviderError,
        }
    }

    pub fn to_run_error(&self) -> RunError {
        RunError::new(self.code(), self.to_string())
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(err.to_string())
        } else if err.is_decode() {
            Self::MalformedResponse(err.to_string())
        } else {
            Self::Transport(err.to_string())
        }
    }
}
