use async_trait::async_trait;
use chrono::Utc;
use mongodb::bson::{doc, Document};
use mongodb::Client;
use stride_types::{
    Assistant, Message, Metadata, Run, RunPatch, RunStatus, RunStep, RunStepPatch, Thread,
};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::dbs::mongo::repositories::RecordRepository;
use crate::error::{PersistError, Result};
use crate::store::{MessageQuery, PersistenceStore, RunFilter, SortOrder};

const ACTIVE_STATUSES: [RunStatus; 4] = [
    RunStatus::Queued,
    RunStatus::InProgress,
    RunStatus::RequiresAction,
    RunStatus::Cancelling,
];

fn active_status_values() -> Vec<&'static str> {
    ACTIVE_STATUSES.iter().map(|s| s.as_str()).collect()
}

/// MongoDB backend, one collection per record type.
///
/// Run updates are compare-and-swap on the stored status and round, so a
/// writer holding a stale copy gets `Conflict`.
pub struct MongoStore {
    client: Client,
    database: String,
    assistants: RecordRepository<Assistant>,
    threads: RecordRepository<Thread>,
    messages: RecordRepository<Message>,
    runs: RecordRepository<Run>,
    steps: RecordRepository<RunStep>,
    /// Serializes the active-run check with the insert
    run_admission: Mutex<()>,
}

impl MongoStore {
    /// Connect to MongoDB and make sure indexes exist
    pub async fn connect(mongodb_uri: &str, database: &str) -> Result<Self> {
        let client = Client::with_uri_str(mongodb_uri)
            .await
            .map_err(|e| PersistError::Connection(e.to_string()))?;

        let store = Self {
            assistants: RecordRepository::new(&client, database, "assistants", "assistant"),
            threads: RecordRepository::new(&client, database, "threads", "thread"),
            messages: RecordRepository::new(&client, database, "messages", "message"),
            runs: RecordRepository::new(&client, database, "runs", "run"),
            steps: RecordRepository::new(&client, database, "run_steps", "run_step"),
            client,
            database: database.to_string(),
            run_admission: Mutex::new(()),
        };

        store.assistants.ensure_indexes(&[]).await?;
        store.threads.ensure_indexes(&[]).await?;
        store.messages.ensure_indexes(&["thread_id"]).await?;
        store.runs.ensure_indexes(&["thread_id"]).await?;
        store.steps.ensure_indexes(&["run_id"]).await?;

        info!(database, "connected to MongoDB");
        Ok(store)
    }

    async fn active_run(&self, thread_id: &str) -> Result<Option<Run>> {
        self.runs
            .find_one(doc! {
                "thread_id": thread_id,
                "status": { "$in": active_status_values() },
            })
            .await
    }
}

#[async_trait]
impl PersistenceStore for MongoStore {
    async fn create_assistant(&self, assistant: Assistant) -> Result<Assistant> {
        self.assistants.insert(&assistant).await?;
        Ok(assistant)
    }

    async fn get_assistant(&self, assistant_id: &str) -> Result<Assistant> {
        self.assistants.find(assistant_id).await
    }

    async fn update_assistant_metadata(
        &self,
        assistant_id: &str,
        metadata: Metadata,
    ) -> Result<Assistant> {
        let mut assistant = self.assistants.find(assistant_id).await?;
        assistant.metadata = metadata;
        self.assistants
            .replace_if(assistant_id, doc! {}, &assistant)
            .await?;
        Ok(assistant)
    }

    async fn create_thread(&self, thread: Thread) -> Result<Thread> {
        self.threads.insert(&thread).await?;
        Ok(thread)
    }

    async fn get_thread(&self, thread_id: &str) -> Result<Thread> {
        self.threads.find(thread_id).await
    }

    async fn delete_thread(&self, thread_id: &str) -> Result<()> {
        let _admission = self.run_admission.lock().await;
        self.threads.find(thread_id).await?;
        if let Some(run) = self.active_run(thread_id).await? {
            return Err(PersistError::ActiveRunExists {
                thread_id: thread_id.to_string(),
                run_id: run.id,
            });
        }

        let filter = doc! { "thread_id": thread_id };
        let steps = self.steps.delete_where(filter.clone()).await?;
        let runs = self.runs.delete_where(filter.clone()).await?;
        let messages = self.messages.delete_where(filter).await?;
        self.threads.delete_where(doc! { "id": thread_id }).await?;
        debug!(thread_id, steps, runs, messages, "thread deleted");
        Ok(())
    }

    async fn append_message(&self, message: Message) -> Result<Message> {
        self.threads.find(&message.thread_id).await?;
        self.messages.insert(&message).await?;
        Ok(message)
    }

    async fn list_messages(&self, thread_id: &str, query: MessageQuery) -> Result<Vec<Message>> {
        self.threads.find(thread_id).await?;

        let ascending = query.order == SortOrder::Asc;
        let mut filter = doc! { "thread_id": thread_id };
        if let Some(cursor) = &query.after {
            if self
                .messages
                .find_one(doc! { "id": cursor.as_str(), "thread_id": thread_id })
                .await?
                .is_none()
            {
                return Err(PersistError::not_found("message", cursor));
            }
            let op = if ascending { "$gt" } else { "$lt" };
            let mut range = Document::new();
            range.insert(op, cursor.as_str());
            filter.insert("id", range);
        }

        let limit = query.limit.map(|l| l as i64);
        self.messages.find_many(filter, ascending, limit).await
    }

    async fn insert_run(&self, run: Run) -> Result<Run> {
        let _admission = self.run_admission.lock().await;
        self.threads.find(&run.thread_id).await?;
        if let Some(active) = self.active_run(&run.thread_id).await? {
            return Err(PersistError::ActiveRunExists {
                thread_id: run.thread_id.clone(),
                run_id: active.id,
            });
        }
        self.runs.insert(&run).await?;
        Ok(run)
    }

    async fn get_run(&self, run_id: &str) -> Result<Run> {
        self.runs.find(run_id).await
    }

    async fn update_run(&self, run_id: &str, patch: RunPatch) -> Result<Run> {
        let mut run = self.runs.find(run_id).await?;
        let guard = doc! { "status": run.status.as_str(), "round": run.round as i64 };

        run.apply(patch, Utc::now())?;

        if self.runs.replace_if(run_id, guard, &run).await? {
            Ok(run)
        } else {
            Err(PersistError::Conflict(format!(
                "run {run_id} was modified concurrently"
            )))
        }
    }

    async fn list_runs(&self, filter: RunFilter) -> Result<Vec<Run>> {
        let mut query = doc! {};
        if let Some(thread_id) = &filter.thread_id {
            self.threads.find(thread_id).await?;
            query.insert("thread_id", thread_id.as_str());
        }
        if filter.active_only {
            query.insert("status", doc! { "$in": active_status_values() });
        }
        self.runs.find_many(query, true, None).await
    }

    async fn create_run_step(&self, step: RunStep) -> Result<RunStep> {
        self.runs.find(&step.run_id).await?;
        self.steps.insert(&step).await?;
        Ok(step)
    }

    async fn update_run_step(&self, step_id: &str, patch: RunStepPatch) -> Result<RunStep> {
        let mut step = self.steps.find(step_id).await?;
        step.apply(patch, Utc::now())?;

        // completed_at is set exactly when a step turns terminal
        let guard = doc! { "completed_at": null };
        if self.steps.replace_if(step_id, guard, &step).await? {
            Ok(step)
        } else {
            Err(PersistError::Conflict(format!("run step {step_id} is terminal")))
        }
    }

    async fn list_run_steps(&self, run_id: &str) -> Result<Vec<RunStep>> {
        self.runs.find(run_id).await?;
        self.steps
            .find_many(doc! { "run_id": run_id }, true, None)
            .await
    }

    async fn ping(&self) -> Result<()> {
        self.client
            .database(&self.database)
            .run_command(doc! { "ping": 1 })
            .await?;
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "mongodb"
    }
}
