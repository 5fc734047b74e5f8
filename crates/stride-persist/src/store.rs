use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use stride_types::{
    Assistant, Message, Metadata, Run, RunPatch, RunStep, RunStepPatch, Thread,
};

use crate::error::Result;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

/// Page of a thread's messages. `after` is an exclusive message-id cursor in
/// the requested order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessageQuery {
    pub order: SortOrder,
    pub limit: Option<usize>,
    pub after: Option<String>,
}

impl MessageQuery {
    pub fn desc() -> Self {
        Self {
            order: SortOrder::Desc,
            ..Default::default()
        }
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn after(mut self, cursor: impl Into<String>) -> Self {
        self.after = Some(cursor.into());
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunFilter {
    pub thread_id: Option<String>,
    pub active_only: bool,
}

impl RunFilter {
    pub fn thread(thread_id: impl Into<String>) -> Self {
        Self {
            thread_id: Some(thread_id.into()),
            active_only: false,
        }
    }

    pub fn active() -> Self {
        Self {
            thread_id: None,
            active_only: true,
        }
    }

    pub fn active_only(mut self) -> Self {
        self.active_only = true;
        self
    }
}

/// Durable storage for every engine record.
///
/// Each call is atomic for the record it touches. Reads return the last
/// committed version; a half-applied update is never visible.
#[async_trait]
pub trait PersistenceStore: Send + Sync {
    async fn create_assistant(&self, assistant: Assistant) -> Result<Assistant>;

    async fn get_assistant(&self, assistant_id: &str) -> Result<Assistant>;

    /// Replace an assistant's metadata, the only mutable field
    async fn update_assistant_metadata(
        &self,
        assistant_id: &str,
        metadata: Metadata,
    ) -> Result<Assistant>;

    async fn create_thread(&self, thread: Thread) -> Result<Thread>;

    async fn get_thread(&self, thread_id: &str) -> Result<Thread>;

    /// Delete a thread with its messages, runs and steps. Refused while the
    /// thread has an active run.
    async fn delete_thread(&self, thread_id: &str) -> Result<()>;

    /// Append to an existing thread
    async fn append_message(&self, message: Message) -> Result<Message>;

    async fn list_messages(&self, thread_id: &str, query: MessageQuery) -> Result<Vec<Message>>;

    /// Insert a queued run unless its thread already has a non-terminal one
    async fn insert_run(&self, run: Run) -> Result<Run>;

    async fn get_run(&self, run_id: &str) -> Result<Run>;

    /// Apply a patch through the run status lattice
    async fn update_run(&self, run_id: &str, patch: RunPatch) -> Result<Run>;

    /// Runs in creation order
    async fn list_runs(&self, filter: RunFilter) -> Result<Vec<Run>>;

    async fn create_run_step(&self, step: RunStep) -> Result<RunStep>;

    /// Refused once the step is terminal
    async fn update_run_step(&self, step_id: &str, patch: RunStepPatch) -> Result<RunStep>;

    /// Steps of a run in creation order
    async fn list_run_steps(&self, run_id: &str) -> Result<Vec<RunStep>>;

    async fn ping(&self) -> Result<()>;

    /// Backend name for health output
    fn backend(&self) -> &'static str;
}
