use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::json;
use stride_llm::LLMGateway;
use stride_persist::{MessageQuery, PersistError, PersistenceStore, RunFilter};
use stride_tools::ToolRegistry;
use stride_types::{
    Assistant, Message, MessageRole, Metadata, Run, RunError, RunErrorCode, RunPatch, RunStatus,
    RunStep, RunStepPatch, RunStepStatus, Thread, ToolOutput,
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::builder::RunEngineBuilder;
use crate::error::{EngineError, Result};
use crate::processor::RunProcessor;
use crate::sweeper;
use crate::types::{CreateAssistant, CreateRun, EngineConfig};

/// Live background task for a run. `epoch` tells a finished task apart from
/// the one that replaced it after a resume.
struct RunHandle {
    epoch: u64,
    cancel: CancellationToken,
}

/// State shared by the engine front and every run task
pub(crate) struct EngineContext {
    pub(crate) store: Arc<dyn PersistenceStore>,
    pub(crate) gateway: Arc<dyn LLMGateway>,
    pub(crate) tools: Arc<ToolRegistry>,
    pub(crate) config: EngineConfig,
    handles: DashMap<String, RunHandle>,
    next_epoch: AtomicU64,
    pub(crate) shutdown: CancellationToken,
}

impl EngineContext {
    /// Move a run to failed. Only an in-progress run can fail.
    pub(crate) async fn fail_run(&self, run_id: &str, error: RunError) -> Result<Run> {
        tracing::warn!(run_id, code = ?error.code, error = %error.message, "run failed");
        let run = self
            .store
            .update_run(run_id, RunPatch::failed(error.clone()).expect(RunStatus::InProgress))
            .await?;
        self.close_open_steps(run_id, RunStepStatus::Failed, Some(error))
            .await;
        self.answer_open_calls(&run, "run failed").await;
        Ok(run)
    }

    pub(crate) async fn expire_run(&self, run_id: &str, expect: RunStatus) -> Result<Run> {
        let run = self
            .store
            .update_run(run_id, RunPatch::expired().expect(expect))
            .await?;
        tracing::info!(run_id, "run expired");
        self.close_open_steps(run_id, RunStepStatus::Expired, run.last_error.clone())
            .await;
        self.answer_open_calls(&run, "run expired").await;
        Ok(run)
    }

    /// `cancelling -> cancelled`. A no-op once another path finalized it;
    /// returns whether this call did the transition.
    pub(crate) async fn finalize_cancel(&self, run_id: &str) -> bool {
        let error = RunError::new(RunErrorCode::RunCancelled, "run was cancelled");
        let patch = RunPatch {
            status: Some(RunStatus::Cancelled),
            last_error: Some(error.clone()),
            expect: Some(RunStatus::Cancelling),
            ..Default::default()
        };

        match self.store.update_run(run_id, patch).await {
            Ok(run) => {
                tracing::info!(run_id, "run cancelled");
                self.close_open_steps(run_id, RunStepStatus::Cancelled, Some(error))
                    .await;
                self.answer_open_calls(&run, "run cancelled").await;
                true
            }
            Err(PersistError::Conflict(_)) => {
                tracing::debug!(run_id, "cancellation already finalized");
                false
            }
            Err(e) => {
                tracing::error!(run_id, error = %e, "failed to finalize cancellation");
                false
            }
        }
    }

    /// Bring a run whose task hit an unexpected error to a terminal state
    pub(crate) async fn settle(&self, run_id: &str, cause: &EngineError) {
        let run = match self.store.get_run(run_id).await {
            Ok(run) => run,
            Err(e) => {
                tracing::error!(run_id, error = %e, "cannot settle run");
                return;
            }
        };

        match run.status {
            RunStatus::Cancelling => {
                self.finalize_cancel(run_id).await;
            }
            RunStatus::InProgress => {
                let error = RunError::new(RunErrorCode::ServerError, cause.to_string());
                if let Err(e) = self.fail_run(run_id, error).await {
                    tracing::error!(run_id, error = %e, "failed to record run failure");
                }
            }
            status => tracing::debug!(run_id, %status, "run left as is"),
        }
    }

    /// Give every tool call the run asked for a reply if it has none yet.
    /// A call left unanswered makes the thread an invalid chat history.
    async fn answer_open_calls(&self, run: &Run, reason: &str) {
        let messages = match self
            .store
            .list_messages(&run.thread_id, MessageQuery::default())
            .await
        {
            Ok(messages) => messages,
            Err(e) => {
                tracing::warn!(run_id = %run.id, error = %e, "could not list open tool calls");
                return;
            }
        };

        let answered: HashSet<&str> = messages
            .iter()
            .filter(|m| m.role == MessageRole::Tool)
            .filter_map(|m| m.tool_call_id.as_deref())
            .collect();
        let open: Vec<String> = messages
            .iter()
            .filter(|m| m.run_id.as_deref() == Some(run.id.as_str()))
            .filter_map(|m| m.tool_calls.as_ref())
            .flatten()
            .filter(|call| !answered.contains(call.id.as_str()))
            .map(|call| call.id.clone())
            .collect();

        let content = json!({ "error": reason }).to_string();
        for call_id in open {
            let reply = Message::tool(&run.thread_id, &run.id, call_id.as_str(), content.clone());
            if let Err(e) = self.store.append_message(reply).await {
                tracing::warn!(
                    run_id = %run.id,
                    %call_id,
                    error = %e,
                    "could not close tool call"
                );
            }
        }
    }

    async fn close_open_steps(&self, run_id: &str, status: RunStepStatus, error: Option<RunError>) {
        let steps = match self.store.list_run_steps(run_id).await {
            Ok(steps) => steps,
            Err(e) => {
                tracing::warn!(run_id, error = %e, "could not list steps to close");
                return;
            }
        };

        for step in steps.iter().filter(|s| !s.status.is_terminal()) {
            let patch = RunStepPatch {
                status: Some(status),
                last_error: error.clone(),
                ..Default::default()
            };
            if let Err(e) = self.store.update_run_step(&step.id, patch).await {
                tracing::debug!(run_id, step_id = %step.id, error = %e, "step already closed");
            }
        }
    }
}

/// Drives runs through their lifecycle. Cheap to clone; all clones share the
/// same task table.
#[derive(Clone)]
pub struct RunEngine {
    ctx: Arc<EngineContext>,
}

impl RunEngine {
    pub fn builder() -> RunEngineBuilder {
        RunEngineBuilder::new()
    }

    pub(crate) fn from_parts(
        store: Arc<dyn PersistenceStore>,
        gateway: Arc<dyn LLMGateway>,
        tools: Arc<ToolRegistry>,
        config: EngineConfig,
    ) -> Self {
        Self {
            ctx: Arc::new(EngineContext {
                store,
                gateway,
                tools,
                config,
                handles: DashMap::new(),
                next_epoch: AtomicU64::new(0),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    pub fn store(&self) -> &Arc<dyn PersistenceStore> {
        &self.ctx.store
    }

    pub fn tools(&self) -> &Arc<ToolRegistry> {
        &self.ctx.tools
    }

    pub fn config(&self) -> &EngineConfig {
        &self.ctx.config
    }

    /// Number of runs with a live background task
    pub fn active_tasks(&self) -> usize {
        self.ctx.handles.len()
    }

    pub async fn create_assistant(&self, request: CreateAssistant) -> Result<Assistant> {
        if request.name.trim().is_empty() {
            return Err(EngineError::Validation("'name' must not be empty".into()));
        }
        if request.model.trim().is_empty() {
            return Err(EngineError::Validation("'model' must not be empty".into()));
        }
        let mut seen = HashSet::new();
        if let Some(dup) = request.tools.iter().find(|t| !seen.insert(t.as_str())) {
            return Err(EngineError::Validation(format!("tool '{dup}' listed twice")));
        }
        let specs = self.ctx.tools.resolve_specs(&request.tools)?;

        let assistant = Assistant::new(request.name, request.model, request.instructions, specs)
            .with_metadata(request.metadata);
        let assistant = self.ctx.store.create_assistant(assistant).await?;
        tracing::info!(assistant_id = %assistant.id, tools = assistant.tools.len(), "assistant created");
        Ok(assistant)
    }

    pub async fn create_thread(&self, metadata: Metadata) -> Result<Thread> {
        let thread = self.ctx.store.create_thread(Thread::new(metadata)).await?;
        tracing::debug!(thread_id = %thread.id, "thread created");
        Ok(thread)
    }

    /// Append a client message. Tool messages only come from tool-output
    /// submission, and a thread with an active run is closed to new input.
    pub async fn post_message(
        &self,
        thread_id: &str,
        role: MessageRole,
        content: String,
    ) -> Result<Message> {
        if role == MessageRole::Tool {
            return Err(EngineError::Validation(
                "tool messages are added by submitting tool outputs".into(),
            ));
        }
        if content.trim().is_empty() {
            return Err(EngineError::Validation("'content' must not be empty".into()));
        }

        self.ctx.store.get_thread(thread_id).await?;
        if let Some(active) = self.active_run(thread_id).await? {
            return Err(EngineError::ActiveRun {
                thread_id: thread_id.to_string(),
                run_id: active.id,
            });
        }

        let mut message = Message::user(thread_id, content);
        message.role = role;
        Ok(self.ctx.store.append_message(message).await?)
    }

    async fn active_run(&self, thread_id: &str) -> Result<Option<Run>> {
        let mut runs = self
            .ctx
            .store
            .list_runs(RunFilter::thread(thread_id).active_only())
            .await?;
        Ok(runs.pop())
    }

    /// Persist a queued run and start processing it in the background.
    /// Returns as soon as the run is stored.
    pub async fn create_run(&self, thread_id: &str, request: CreateRun) -> Result<Run> {
        self.ctx.store.get_thread(thread_id).await?;
        let assistant = self.ctx.store.get_assistant(&request.assistant_id).await?;

        let ttl = chrono::Duration::from_std(self.ctx.config.run_ttl)
            .map_err(|e| EngineError::Setup(format!("run ttl out of range: {e}")))?;
        let run = Run::queued(
            thread_id,
            &assistant.id,
            request.model.unwrap_or(assistant.model),
            request.instructions.unwrap_or(assistant.instructions),
            ttl,
        )
        .with_metadata(request.metadata);

        let run = self.ctx.store.insert_run(run).await?;
        tracing::info!(run_id = %run.id, thread_id, assistant_id = %run.assistant_id, "run created");

        self.spawn_processor(&run.id);
        Ok(run)
    }

    pub async fn get_run(&self, run_id: &str) -> Result<Run> {
        Ok(self.ctx.store.get_run(run_id).await?)
    }

    /// Like [`RunEngine::get_run`] but a run from another thread is not found
    pub async fn get_thread_run(&self, thread_id: &str, run_id: &str) -> Result<Run> {
        let run = self.ctx.store.get_run(run_id).await?;
        if run.thread_id != thread_id {
            return Err(EngineError::NotFound(format!(
                "run {run_id} not found in thread {thread_id}"
            )));
        }
        Ok(run)
    }

    pub async fn list_runs(&self, thread_id: &str) -> Result<Vec<Run>> {
        self.ctx.store.get_thread(thread_id).await?;
        Ok(self.ctx.store.list_runs(RunFilter::thread(thread_id)).await?)
    }

    pub async fn list_run_steps(&self, thread_id: &str, run_id: &str) -> Result<Vec<RunStep>> {
        self.get_thread_run(thread_id, run_id).await?;
        Ok(self.ctx.store.list_run_steps(run_id).await?)
    }

    pub async fn get_assistant(&self, assistant_id: &str) -> Result<Assistant> {
        Ok(self.ctx.store.get_assistant(assistant_id).await?)
    }

    pub async fn update_assistant_metadata(
        &self,
        assistant_id: &str,
        metadata: Metadata,
    ) -> Result<Assistant> {
        Ok(self
            .ctx
            .store
            .update_assistant_metadata(assistant_id, metadata)
            .await?)
    }

    pub async fn get_thread(&self, thread_id: &str) -> Result<Thread> {
        Ok(self.ctx.store.get_thread(thread_id).await?)
    }

    /// Refused with [`EngineError::ActiveRun`] while a run is in flight
    pub async fn delete_thread(&self, thread_id: &str) -> Result<()> {
        self.ctx.store.delete_thread(thread_id).await?;
        tracing::info!(thread_id, "thread deleted");
        Ok(())
    }

    pub async fn list_messages(
        &self,
        thread_id: &str,
        query: MessageQuery,
    ) -> Result<Vec<Message>> {
        self.ctx.store.get_thread(thread_id).await?;
        Ok(self.ctx.store.list_messages(thread_id, query).await?)
    }

    /// Resume a run waiting on the client. The outputs must answer exactly
    /// the pending calls; otherwise nothing changes.
    pub async fn submit_tool_outputs(&self, run_id: &str, outputs: Vec<ToolOutput>) -> Result<Run> {
        let run = self.ctx.store.get_run(run_id).await?;
        if run.status != RunStatus::RequiresAction {
            return Err(EngineError::InvalidRequest(format!(
                "run {run_id} is {}, not requires_action",
                run.status
            )));
        }
        if run.is_expired_at(Utc::now()) {
            self.ctx.expire_run(run_id, RunStatus::RequiresAction).await?;
            return Err(EngineError::InvalidRequest(format!("run {run_id} has expired")));
        }

        let pending: HashSet<&str> = run.pending_call_ids().into_iter().collect();
        let mut submitted = HashSet::new();
        for output in &outputs {
            let id = output.tool_call_id.as_str();
            if !submitted.insert(id) {
                return Err(EngineError::InvalidRequest(format!(
                    "duplicate output for tool call '{id}'"
                )));
            }
            if !pending.contains(id) {
                return Err(EngineError::InvalidRequest(format!(
                    "tool call '{id}' is not pending on run {run_id}"
                )));
            }
        }
        if submitted.len() != pending.len() {
            let mut missing: Vec<&str> = pending.difference(&submitted).copied().collect();
            missing.sort_unstable();
            return Err(EngineError::InvalidRequest(format!(
                "missing outputs for tool calls: {}",
                missing.join(", ")
            )));
        }

        // Outputs land before the run leaves requires_action, so a failed
        // write leaves it waiting. Calls answered by an earlier attempt are
        // not answered twice.
        let history = self
            .ctx
            .store
            .list_messages(&run.thread_id, MessageQuery::default())
            .await?;
        let answered: HashSet<&str> = history
            .iter()
            .filter(|m| m.role == MessageRole::Tool && m.run_id.as_deref() == Some(run_id))
            .filter_map(|m| m.tool_call_id.as_deref())
            .collect();

        // History follows the order the model asked for the calls in
        let order = run.pending_call_ids();
        let mut outputs = outputs;
        outputs.sort_by_key(|o| order.iter().position(|id| *id == o.tool_call_id));
        for output in outputs {
            if answered.contains(output.tool_call_id.as_str()) {
                continue;
            }
            let message = Message::tool(&run.thread_id, run_id, output.tool_call_id, output.output);
            self.ctx.store.append_message(message).await?;
        }

        let waiting: Vec<String> = self
            .ctx
            .store
            .list_run_steps(run_id)
            .await?
            .into_iter()
            .filter(|step| step.status == RunStepStatus::RequiresAction)
            .map(|step| step.id)
            .collect();

        let resumed = self
            .ctx
            .store
            .update_run(
                run_id,
                RunPatch::status(RunStatus::InProgress).expect(RunStatus::RequiresAction),
            )
            .await
            .map_err(|e| match e {
                PersistError::Conflict(msg) => EngineError::InvalidRequest(msg),
                other => other.into(),
            })?;

        // The run is ours again; from here on nothing may leave it idle
        for step_id in waiting {
            if let Err(e) = self
                .ctx
                .store
                .update_run_step(&step_id, RunStepPatch::status(RunStepStatus::Completed))
                .await
            {
                tracing::warn!(run_id, %step_id, error = %e, "could not complete waiting step");
            }
        }

        tracing::info!(run_id, "tool outputs accepted, resuming run");
        self.spawn_processor(run_id);
        Ok(resumed)
    }

    /// Request cancellation. The run is `cancelling` until its task stops or
    /// the grace period runs out.
    pub async fn cancel_run(&self, run_id: &str) -> Result<Run> {
        let run = self.ctx.store.get_run(run_id).await?;
        match run.status {
            // Nothing is left to stop an orphaned cancellation
            RunStatus::Cancelling if !self.ctx.handles.contains_key(run_id) => {
                self.ctx.finalize_cancel(run_id).await;
                return self.get_run(run_id).await;
            }
            RunStatus::Cancelling => return Ok(run),
            status if status.is_terminal() => {
                return Err(EngineError::InvalidRequest(format!(
                    "run {run_id} is already {status}"
                )));
            }
            _ => {}
        }

        let cancelling = self
            .ctx
            .store
            .update_run(run_id, RunPatch::status(RunStatus::Cancelling).expect(run.status))
            .await
            .map_err(|e| match e {
                PersistError::Conflict(msg) => EngineError::InvalidRequest(msg),
                other => other.into(),
            })?;
        tracing::info!(run_id, from = %run.status, "cancellation requested");

        let live = self.ctx.handles.get(run_id).map(|h| h.cancel.clone());
        match live {
            Some(token) if run.status != RunStatus::RequiresAction => {
                token.cancel();
                self.spawn_cancel_watchdog(run_id);
                Ok(cancelling)
            }
            _ => {
                self.ctx.finalize_cancel(run_id).await;
                self.get_run(run_id).await
            }
        }
    }

    /// Expire every non-terminal run past its deadline and finalize
    /// cancellations nobody will finish: those without a live task, or
    /// still cancelling a grace period past the deadline. Safe to call
    /// repeatedly; returns how many runs this call settled.
    pub async fn sweep_expired(&self) -> Result<usize> {
        let now = Utc::now();
        let mut expired = 0;
        let mut cancelled = 0;

        for run in self.ctx.store.list_runs(RunFilter::active()).await? {
            if run.status == RunStatus::Cancelling {
                if self.cancel_overdue(&run, now) && self.ctx.finalize_cancel(&run.id).await {
                    cancelled += 1;
                }
                continue;
            }
            if !run.is_expired_at(now) {
                continue;
            }
            match self.ctx.expire_run(&run.id, run.status).await {
                Ok(_) => {
                    expired += 1;
                    if let Some(handle) = self.ctx.handles.get(&run.id) {
                        handle.cancel.cancel();
                    }
                }
                Err(EngineError::Conflict(_)) => {
                    tracing::debug!(run_id = %run.id, "run changed before it could expire");
                }
                Err(e) => return Err(e),
            }
        }

        if expired > 0 || cancelled > 0 {
            tracing::info!(expired, cancelled, "swept overdue runs");
        }
        Ok(expired + cancelled)
    }

    fn cancel_overdue(&self, run: &Run, now: DateTime<Utc>) -> bool {
        if !self.ctx.handles.contains_key(&run.id) {
            return true;
        }
        (now - run.expires_at)
            .to_std()
            .is_ok_and(|late| late >= self.ctx.config.cancel_grace)
    }

    /// Background expiry loop, stopped by [`RunEngine::shutdown`]
    pub fn spawn_sweeper(&self) -> JoinHandle<()> {
        let engine = self.clone();
        let stop = self.ctx.shutdown.child_token();
        tokio::spawn(sweeper::run(engine, stop))
    }

    /// Stop the sweeper and every run task
    pub fn shutdown(&self) {
        tracing::info!(active_tasks = self.ctx.handles.len(), "run engine shutting down");
        self.ctx.shutdown.cancel();
    }

    fn spawn_processor(&self, run_id: &str) {
        let epoch = self.ctx.next_epoch.fetch_add(1, Ordering::Relaxed);
        let cancel = self.ctx.shutdown.child_token();
        self.ctx.handles.insert(
            run_id.to_string(),
            RunHandle {
                epoch,
                cancel: cancel.clone(),
            },
        );

        let ctx = Arc::clone(&self.ctx);
        let run_id = run_id.to_string();
        tokio::spawn(async move {
            RunProcessor::new(Arc::clone(&ctx), run_id.clone(), cancel)
                .run()
                .await;
            ctx.handles.remove_if(&run_id, |_, h| h.epoch == epoch);
        });
    }

    fn spawn_cancel_watchdog(&self, run_id: &str) {
        let ctx = Arc::clone(&self.ctx);
        let run_id = run_id.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(ctx.config.cancel_grace).await;
            ctx.finalize_cancel(&run_id).await;
        });
    }
}
