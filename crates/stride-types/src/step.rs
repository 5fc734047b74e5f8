use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ids::{new_id, STEP_PREFIX};
use crate::run::RunError;
use crate::tool::ToolCall;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStepType {
    MessageCreation,
    ToolCalls,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStepStatus {
    InProgress,
    RequiresAction,
    Completed,
    Failed,
    Cancelled,
    Expired,
}

impl RunStepStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Cancelled | Self::Expired
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepDetails {
    MessageCreation { message_id: Option<String> },
    ToolCalls { tool_calls: Vec<ToolCall> },
}

/// Audit record of one unit of run work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunStep {
    pub id: String,
    pub run_id: String,
    pub thread_id: String,
    #[serde(rename = "type")]
    pub step_type: RunStepType,
    pub status: RunStepStatus,
    pub step_details: StepDetails,
    #[serde(default)]
    pub last_error: Option<RunError>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl RunStep {
    pub fn message_creation(run_id: &str, thread_id: &str) -> Self {
        Self::new(
            run_id,
            thread_id,
            RunStepType::MessageCreation,
            StepDetails::MessageCreation { message_id: None },
        )
    }

    pub fn tool_calls(run_id: &str, thread_id: &str, tool_calls: Vec<ToolCall>) -> Self {
        Self::new(
            run_id,
            thread_id,
            RunStepType::ToolCalls,
            StepDetails::ToolCalls { tool_calls },
        )
    }

    fn new(run_id: &str, thread_id: &str, step_type: RunStepType, details: StepDetails) -> Self {
        Self {
            id: new_id(STEP_PREFIX),
            run_id: run_id.to_string(),
            thread_id: thread_id.to_string(),
            step_type,
            status: RunStepStatus::InProgress,
            step_details: details,
            last_error: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    pub fn apply(&mut self, patch: RunStepPatch, now: DateTime<Utc>) -> Result<(), StepFrozen> {
        if self.status.is_terminal() {
            return Err(StepFrozen {
                step_id: self.id.clone(),
            });
        }

        if let Some(status) = patch.status {
            if status.is_terminal() {
                self.completed_at = Some(now);
            }
            self.status = status;
        }
        if let Some(details) = patch.step_details {
            self.step_details = details;
        }
        if let Some(error) = patch.last_error {
            self.last_error = Some(error);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunStepPatch {
    pub status: Option<RunStepStatus>,
    pub step_details: Option<StepDetails>,
    pub last_error: Option<RunError>,
}

impl RunStepPatch {
    pub fn status(status: RunStepStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn message_created(message_id: impl Into<String>) -> Self {
        Self {
            status: Some(RunStepStatus::Completed),
            step_details: Some(StepDetails::MessageCreation {
                message_id: Some(message_id.into()),
            }),
            last_error: None,
        }
    }

    pub fn with_error(mut self, error: RunError) -> Self {
        self.last_error = Some(error);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("run step {step_id} is terminal")]
pub struct StepFrozen {
    pub step_id: String,
}
