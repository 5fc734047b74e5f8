use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ids::{new_id, RUN_PREFIX};
use crate::tool::ToolCall;
use crate::Metadata;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    InProgress,
    RequiresAction,
    Cancelling,
    Cancelled,
    Failed,
    Completed,
    Expired,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Cancelled | Self::Failed | Self::Completed | Self::Expired
        )
    }

    /// Edges of the run lattice. `requires_action -> in_progress` is the only
    /// backward edge.
    pub fn can_transition_to(&self, next: RunStatus) -> bool {
        use RunStatus::*;

        match self {
            Queued => matches!(next, InProgress | Cancelling | Expired | Failed),
            InProgress => matches!(
                next,
                Completed | RequiresAction | Failed | Expired | Cancelling
            ),
            RequiresAction => matches!(next, InProgress | Cancelling | Expired),
            Cancelling => matches!(next, Cancelled),
            Cancelled | Failed | Completed | Expired => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::InProgress => "in_progress",
            Self::RequiresAction => "requires_action",
            Self::Cancelling => "cancelling",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
            Self::Completed => "completed",
            Self::Expired => "expired",
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outstanding work the client must perform before the run can continue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RequiredAction {
    SubmitToolOutputs { tool_calls: Vec<ToolCall> },
}

impl RequiredAction {
    pub fn tool_calls(&self) -> &[ToolCall] {
        match self {
            Self::SubmitToolOutputs { tool_calls } => tool_calls,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunErrorCode {
    RateLimitExceeded,
    AuthenticationFailed,
    MalformedResponse,
    ProviderTimeout,
    ProviderError,
    RunExpired,
    RunCancelled,
    MaxRoundsExceeded,
    ServerError,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunError {
    pub code: RunErrorCode,
    pub message: String,
}

impl RunError {
    pub fn new(code: RunErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    pub id: String,
    pub thread_id: String,
    pub assistant_id: String,
    pub model: String,
    pub instructions: String,
    pub status: RunStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required_action: Option<RequiredAction>,

    #[serde(default)]
    pub last_error: Option<RunError>,

    /// Model round-trips made so far
    #[serde(default)]
    pub round: u32,

    #[serde(default)]
    pub metadata: Metadata,

    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
}

impl Run {
    pub fn queued(
        thread_id: impl Into<String>,
        assistant_id: impl Into<String>,
        model: impl Into<String>,
        instructions: impl Into<String>,
        ttl: Duration,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: new_id(RUN_PREFIX),
            thread_id: thread_id.into(),
            assistant_id: assistant_id.into(),
            model: model.into(),
            instructions: instructions.into(),
            status: RunStatus::Queued,
            required_action: None,
            last_error: None,
            round: 0,
            metadata: Metadata::new(),
            created_at: now,
            expires_at: now + ttl,
            started_at: None,
            completed_at: None,
            cancelled_at: None,
            failed_at: None,
        }
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        !self.status.is_terminal() && now >= self.expires_at
    }

    /// Ids of the tool calls currently awaiting output
    pub fn pending_call_ids(&self) -> Vec<&str> {
        self.required_action
            .as_ref()
            .map(|a| a.tool_calls().iter().map(|c| c.id.as_str()).collect())
            .unwrap_or_default()
    }

    /// Apply a patch through the status lattice. On error the run is left
    /// untouched.
    pub fn apply(&mut self, patch: RunPatch, now: DateTime<Utc>) -> Result<(), TransitionError> {
        if let Some(expected) = patch.expect {
            if self.status != expected {
                return Err(TransitionError::Stale {
                    expected,
                    actual: self.status,
                });
            }
        }

        if self.status.is_terminal() {
            return Err(TransitionError::Terminal(self.status));
        }

        if let Some(next) = patch.status {
            if next != self.status && !self.status.can_transition_to(next) {
                return Err(TransitionError::Illegal {
                    from: self.status,
                    to: next,
                });
            }

            if next == RunStatus::RequiresAction {
                let has_calls = patch
                    .required_action
                    .as_ref()
                    .is_some_and(|a| !a.tool_calls().is_empty());
                if !has_calls {
                    return Err(TransitionError::MissingToolCalls);
                }
            }
        }

        if let Some(next) = patch.status {
            if next != RunStatus::RequiresAction {
                self.required_action = None;
            }

            match next {
                RunStatus::InProgress if self.started_at.is_none() => self.started_at = Some(now),
                RunStatus::Completed => self.completed_at = Some(now),
                RunStatus::Cancelled => self.cancelled_at = Some(now),
                RunStatus::Failed => self.failed_at = Some(now),
                _ => {}
            }

            self.status = next;
        }

        if let Some(action) = patch.required_action {
            if self.status == RunStatus::RequiresAction {
                self.required_action = Some(action);
            }
        }
        if let Some(error) = patch.last_error {
            self.last_error = Some(error);
        }
        if let Some(round) = patch.round {
            self.round = round;
        }

        Ok(())
    }
}

/// Partial update to a run. Only the status writer path builds these.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunPatch {
    pub status: Option<RunStatus>,
    pub required_action: Option<RequiredAction>,
    pub last_error: Option<RunError>,
    pub round: Option<u32>,
    /// Compare-and-swap guard on the current status
    pub expect: Option<RunStatus>,
}

impl RunPatch {
    pub fn status(status: RunStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn requires_action(tool_calls: Vec<ToolCall>) -> Self {
        Self {
            status: Some(RunStatus::RequiresAction),
            required_action: Some(RequiredAction::SubmitToolOutputs { tool_calls }),
            ..Default::default()
        }
    }

    pub fn failed(error: RunError) -> Self {
        Self {
            status: Some(RunStatus::Failed),
            last_error: Some(error),
            ..Default::default()
        }
    }

    pub fn expired() -> Self {
        Self {
            status: Some(RunStatus::Expired),
            last_error: Some(RunError::new(
                RunErrorCode::RunExpired,
                "run exceeded its expiration time",
            )),
            ..Default::default()
        }
    }

    pub fn expect(mut self, status: RunStatus) -> Self {
        self.expect = Some(status);
        self
    }

    pub fn with_round(mut self, round: u32) -> Self {
        self.round = Some(round);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("run is already {0}")]
    Terminal(RunStatus),

    #[error("illegal transition {from} -> {to}")]
    Illegal { from: RunStatus, to: RunStatus },

    #[error("expected status {expected}, found {actual}")]
    Stale {
        expected: RunStatus,
        actual: RunStatus,
    },

    #[error("requires_action needs at least one pending tool call")]
    MissingToolCalls,
}
