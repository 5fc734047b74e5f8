use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use stride_types::{
    Assistant, Message, Metadata, Run, RunPatch, RunStep, RunStepPatch, Thread,
};
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{PersistError, Result};
use crate::store::{MessageQuery, PersistenceStore, RunFilter, SortOrder};

/// A stored entity addressable by id
pub trait Record: Clone + Send + Sync {
    const KIND: &'static str;

    fn id(&self) -> &str;
}

impl Record for Assistant {
    const KIND: &'static str = "assistant";
    fn id(&self) -> &str {
        &self.id
    }
}

impl Record for Thread {
    const KIND: &'static str = "thread";
    fn id(&self) -> &str {
        &self.id
    }
}

impl Record for Message {
    const KIND: &'static str = "message";
    fn id(&self) -> &str {
        &self.id
    }
}

impl Record for Run {
    const KIND: &'static str = "run";
    fn id(&self) -> &str {
        &self.id
    }
}

impl Record for RunStep {
    const KIND: &'static str = "run_step";
    fn id(&self) -> &str {
        &self.id
    }
}

/// Insertion-ordered rows with an id index
#[derive(Debug)]
pub struct Table<T: Record> {
    rows: Vec<T>,
    index: HashMap<String, usize>,
}

impl<T: Record> Default for Table<T> {
    fn default() -> Self {
        Self {
            rows: Vec::new(),
            index: HashMap::new(),
        }
    }
}

impl<T: Record> Table<T> {
    pub fn insert(&mut self, row: T) -> Result<T> {
        if self.index.contains_key(row.id()) {
            return Err(PersistError::Conflict(format!(
                "{} {} already exists",
                T::KIND,
                row.id()
            )));
        }
        self.index.insert(row.id().to_string(), self.rows.len());
        self.rows.push(row.clone());
        Ok(row)
    }

    pub fn get(&self, id: &str) -> Result<&T> {
        self.index
            .get(id)
            .map(|&i| &self.rows[i])
            .ok_or_else(|| PersistError::not_found(T::KIND, id))
    }

    pub fn get_mut(&mut self, id: &str) -> Result<&mut T> {
        match self.index.get(id) {
            Some(&i) => Ok(&mut self.rows[i]),
            None => Err(PersistError::not_found(T::KIND, id)),
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> {
        self.rows.iter()
    }

    pub fn retain(&mut self, keep: impl FnMut(&T) -> bool) {
        self.rows.retain(keep);
        self.index = self
            .rows
            .iter()
            .enumerate()
            .map(|(i, row)| (row.id().to_string(), i))
            .collect();
    }
}

#[derive(Default)]
struct Tables {
    assistants: Table<Assistant>,
    threads: Table<Thread>,
    messages: Table<Message>,
    runs: Table<Run>,
    steps: Table<RunStep>,
}

impl Tables {
    fn active_run(&self, thread_id: &str) -> Option<&Run> {
        self.runs
            .iter()
            .find(|r| r.thread_id == thread_id && !r.status.is_terminal())
    }
}

/// Single-process store. One lock over all tables keeps cross-table checks
/// (active run per thread, cascade delete) atomic.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PersistenceStore for MemoryStore {
    async fn create_assistant(&self, assistant: Assistant) -> Result<Assistant> {
        self.tables.write().await.assistants.insert(assistant)
    }

    async fn get_assistant(&self, assistant_id: &str) -> Result<Assistant> {
        self.tables
            .read()
            .await
            .assistants
            .get(assistant_id)
            .cloned()
    }

    async fn update_assistant_metadata(
        &self,
        assistant_id: &str,
        metadata: Metadata,
    ) -> Result<Assistant> {
        let mut tables = self.tables.write().await;
        let assistant = tables.assistants.get_mut(assistant_id)?;
        assistant.metadata = metadata;
        Ok(assistant.clone())
    }

    async fn create_thread(&self, thread: Thread) -> Result<Thread> {
        self.tables.write().await.threads.insert(thread)
    }

    async fn get_thread(&self, thread_id: &str) -> Result<Thread> {
        self.tables.read().await.threads.get(thread_id).cloned()
    }

    async fn delete_thread(&self, thread_id: &str) -> Result<()> {
        let mut tables = self.tables.write().await;
        if !tables.threads.contains(thread_id) {
            return Err(PersistError::not_found("thread", thread_id));
        }
        if let Some(run) = tables.active_run(thread_id) {
            return Err(PersistError::ActiveRunExists {
                thread_id: thread_id.to_string(),
                run_id: run.id.clone(),
            });
        }

        tables.steps.retain(|s| s.thread_id != thread_id);
        tables.runs.retain(|r| r.thread_id != thread_id);
        tables.messages.retain(|m| m.thread_id != thread_id);
        tables.threads.retain(|t| t.id != thread_id);
        debug!(thread_id, "thread deleted");
        Ok(())
    }

    async fn append_message(&self, message: Message) -> Result<Message> {
        let mut tables = self.tables.write().await;
        if !tables.threads.contains(&message.thread_id) {
            return Err(PersistError::not_found("thread", &message.thread_id));
        }
        tables.messages.insert(message)
    }

    async fn list_messages(&self, thread_id: &str, query: MessageQuery) -> Result<Vec<Message>> {
        let tables = self.tables.read().await;
        if !tables.threads.contains(thread_id) {
            return Err(PersistError::not_found("thread", thread_id));
        }

        let mut page: Vec<&Message> = tables
            .messages
            .iter()
            .filter(|m| m.thread_id == thread_id)
            .collect();
        if query.order == SortOrder::Desc {
            page.reverse();
        }

        if let Some(cursor) = &query.after {
            let pos = page
                .iter()
                .position(|m| &m.id == cursor)
                .ok_or_else(|| PersistError::not_found("message", cursor))?;
            page.drain(..=pos);
        }
        if let Some(limit) = query.limit {
            page.truncate(limit);
        }

        Ok(page.into_iter().cloned().collect())
    }

    async fn insert_run(&self, run: Run) -> Result<Run> {
        let mut tables = self.tables.write().await;
        if !tables.threads.contains(&run.thread_id) {
            return Err(PersistError::not_found("thread", &run.thread_id));
        }
        if let Some(active) = tables.active_run(&run.thread_id) {
            return Err(PersistError::ActiveRunExists {
                thread_id: run.thread_id.clone(),
                run_id: active.id.clone(),
            });
        }
        tables.runs.insert(run)
    }

    async fn get_run(&self, run_id: &str) -> Result<Run> {
        self.tables.read().await.runs.get(run_id).cloned()
    }

    async fn update_run(&self, run_id: &str, patch: RunPatch) -> Result<Run> {
        let mut tables = self.tables.write().await;
        let run = tables.runs.get_mut(run_id)?;
        run.apply(patch, Utc::now())?;
        Ok(run.clone())
    }

    async fn list_runs(&self, filter: RunFilter) -> Result<Vec<Run>> {
        let tables = self.tables.read().await;
        if let Some(thread_id) = &filter.thread_id {
            if !tables.threads.contains(thread_id) {
                return Err(PersistError::not_found("thread", thread_id));
            }
        }

        Ok(tables
            .runs
            .iter()
            .filter(|r| filter.thread_id.as_ref().map_or(true, |t| &r.thread_id == t))
            .filter(|r| !filter.active_only || !r.status.is_terminal())
            .cloned()
            .collect())
    }

    async fn create_run_step(&self, step: RunStep) -> Result<RunStep> {
        let mut tables = self.tables.write().await;
        if !tables.runs.contains(&step.run_id) {
            return Err(PersistError::not_found("run", &step.run_id));
        }
        tables.steps.insert(step)
    }

    async fn update_run_step(&self, step_id: &str, patch: RunStepPatch) -> Result<RunStep> {
        let mut tables = self.tables.write().await;
        let step = tables.steps.get_mut(step_id)?;
        step.apply(patch, Utc::now())?;
        Ok(step.clone())
    }

    async fn list_run_steps(&self, run_id: &str) -> Result<Vec<RunStep>> {
        let tables = self.tables.read().await;
        if !tables.runs.contains(run_id) {
            return Err(PersistError::not_found("run", run_id));
        }
        Ok(tables
            .steps
            .iter()
            .filter(|s| s.run_id == run_id)
            .cloned()
            .collect())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}
