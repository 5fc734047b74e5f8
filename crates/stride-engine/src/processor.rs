use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::json;
use stride_llm::{Completion, CompletionRequest};
use stride_persist::MessageQuery;
use stride_types::{
    Assistant, Message, Run, RunError, RunErrorCode, RunPatch, RunStatus, RunStep,
    RunStepPatch, RunStepStatus, ToolCall,
};
use tokio_util::sync::CancellationToken;

use crate::engine::EngineContext;
use crate::error::{EngineError, Result};
use crate::router;

/// Why a guarded wait stopped early
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Interrupt {
    Cancelled,
    Expired,
}

/// How a model round ended
enum RoundOutcome {
    /// Tool results are in the thread; ask the model again
    Continue(Run),
    /// Terminal, waiting on the client, or interrupted
    Stop,
}

/// Single writer for one run between pauses. A fresh processor is spawned
/// on creation and on every resume.
pub(crate) struct RunProcessor {
    ctx: Arc<EngineContext>,
    run_id: String,
    cancel: CancellationToken,
}

impl RunProcessor {
    pub(crate) fn new(ctx: Arc<EngineContext>, run_id: String, cancel: CancellationToken) -> Self {
        Self {
            ctx,
            run_id,
            cancel,
        }
    }

    pub(crate) async fn run(self) {
        match self.drive().await {
            Ok(()) => {}
            Err(e @ EngineError::Conflict(_)) => {
                tracing::debug!(run_id = %self.run_id, error = %e, "run changed under its task");
                self.ctx.settle(&self.run_id, &e).await;
            }
            Err(e) => {
                tracing::error!(run_id = %self.run_id, error = %e, "run processing aborted");
                self.ctx.settle(&self.run_id, &e).await;
            }
        }
    }

    async fn drive(&self) -> Result<()> {
        let store = &self.ctx.store;
        let mut run = store.get_run(&self.run_id).await?;

        match run.status {
            RunStatus::Queued => {
                run = store
                    .update_run(
                        &self.run_id,
                        RunPatch::status(RunStatus::InProgress).expect(RunStatus::Queued),
                    )
                    .await?;
                tracing::debug!(run_id = %self.run_id, "run started");
            }
            RunStatus::InProgress => {}
            RunStatus::Cancelling => {
                self.ctx.finalize_cancel(&self.run_id).await;
                return Ok(());
            }
            status => {
                tracing::debug!(run_id = %self.run_id, %status, "nothing to process");
                return Ok(());
            }
        }

        let assistant = store.get_assistant(&run.assistant_id).await?;

        loop {
            if self.cancel.is_cancelled() {
                return self.interrupted(Interrupt::Cancelled).await;
            }
            if run.round >= self.ctx.config.max_rounds {
                let error = RunError::new(
                    RunErrorCode::MaxRoundsExceeded,
                    format!("stopped after {} model round-trips", run.round),
                );
                self.ctx.fail_run(&self.run_id, error).await?;
                return Ok(());
            }

            match self.round(run, &assistant).await? {
                RoundOutcome::Continue(next) => run = next,
                RoundOutcome::Stop => return Ok(()),
            }
        }
    }

    /// One model call and everything that follows from its answer
    async fn round(&self, run: Run, assistant: &Assistant) -> Result<RoundOutcome> {
        let store = &self.ctx.store;
        let run = store
            .update_run(
                &self.run_id,
                RunPatch::default()
                    .with_round(run.round + 1)
                    .expect(RunStatus::InProgress),
            )
            .await?;
        let step = store
            .create_run_step(RunStep::message_creation(&run.id, &run.thread_id))
            .await?;

        let history = store
            .list_messages(&run.thread_id, MessageQuery::default())
            .await?;
        let request = CompletionRequest::new(&run.model)
            .instructions(&run.instructions)
            .history(&history)
            .tools(assistant.tools.clone());

        tracing::debug!(
            run_id = %run.id,
            round = run.round,
            messages = history.len(),
            gateway = self.ctx.gateway.name(),
            "requesting completion"
        );

        let completion = match self
            .guarded(run.expires_at, self.ctx.gateway.complete(request))
            .await
        {
            Err(interrupt) => {
                self.interrupted(interrupt).await?;
                return Ok(RoundOutcome::Stop);
            }
            Ok(Err(provider)) => {
                self.ctx
                    .fail_run(&self.run_id, provider.to_run_error())
                    .await?;
                return Ok(RoundOutcome::Stop);
            }
            Ok(Ok(completion)) => completion,
        };

        match completion {
            Completion::Message { content } => {
                let message = store
                    .append_message(Message::assistant(&run.thread_id, &run.id, content))
                    .await?;
                store
                    .update_run_step(&step.id, RunStepPatch::message_created(&message.id))
                    .await?;
                store
                    .update_run(
                        &self.run_id,
                        RunPatch::status(RunStatus::Completed).expect(RunStatus::InProgress),
                    )
                    .await?;
                tracing::info!(run_id = %run.id, rounds = run.round, "run completed");
                Ok(RoundOutcome::Stop)
            }
            Completion::ToolCalls { calls } if calls.is_empty() => {
                let error = RunError::new(
                    RunErrorCode::MalformedResponse,
                    "model returned an empty tool call list",
                );
                self.ctx.fail_run(&self.run_id, error).await?;
                Ok(RoundOutcome::Stop)
            }
            Completion::ToolCalls { calls } => {
                let message = store
                    .append_message(Message::assistant_tool_calls(
                        &run.thread_id,
                        &run.id,
                        calls.clone(),
                    ))
                    .await?;
                store
                    .update_run_step(&step.id, RunStepPatch::message_created(&message.id))
                    .await?;
                self.handle_tool_calls(run, assistant, calls).await
            }
        }
    }

    async fn handle_tool_calls(
        &self,
        run: Run,
        assistant: &Assistant,
        calls: Vec<ToolCall>,
    ) -> Result<RoundOutcome> {
        let store = &self.ctx.store;
        let step = store
            .create_run_step(RunStep::tool_calls(&run.id, &run.thread_id, calls.clone()))
            .await?;
        let plan = router::plan(calls, &self.ctx.tools, assistant);

        tracing::debug!(
            run_id = %run.id,
            rejected = plan.rejected.len(),
            auto = plan.auto.len(),
            external = plan.external.len(),
            "routed tool calls"
        );

        for (call, reason) in &plan.rejected {
            tracing::warn!(run_id = %run.id, tool = %call.tool_name, %reason, "tool call rejected");
            let content = json!({ "error": reason }).to_string();
            store
                .append_message(Message::tool(&run.thread_id, &run.id, &call.id, content))
                .await?;
        }

        for call in &plan.auto {
            let output = match self
                .guarded(run.expires_at, self.ctx.tools.execute(call))
                .await
            {
                Ok(output) => output,
                Err(interrupt) => {
                    self.interrupted(interrupt).await?;
                    return Ok(RoundOutcome::Stop);
                }
            };
            store
                .append_message(Message::tool(
                    &run.thread_id,
                    &run.id,
                    output.tool_call_id,
                    output.output,
                ))
                .await?;
        }

        if !plan.needs_client() {
            store
                .update_run_step(&step.id, RunStepPatch::status(RunStepStatus::Completed))
                .await?;
            return Ok(RoundOutcome::Continue(run));
        }

        store
            .update_run_step(&step.id, RunStepPatch::status(RunStepStatus::RequiresAction))
            .await?;
        let pending = plan.external.len();
        store
            .update_run(
                &self.run_id,
                RunPatch::requires_action(plan.external).expect(RunStatus::InProgress),
            )
            .await?;
        tracing::info!(run_id = %run.id, pending, "run requires action");
        Ok(RoundOutcome::Stop)
    }

    /// Wait for `fut` unless the run deadline passes first. A cancel request
    /// does not abort the call: it is honoured once the call returns, and
    /// the output is dropped. Shutdown stops the wait at once.
    async fn guarded<F: Future>(
        &self,
        expires_at: DateTime<Utc>,
        fut: F,
    ) -> std::result::Result<F::Output, Interrupt> {
        let remaining = (expires_at - Utc::now())
            .to_std()
            .unwrap_or(Duration::ZERO);

        let out = tokio::select! {
            biased;
            _ = self.ctx.shutdown.cancelled() => return Err(Interrupt::Cancelled),
            _ = tokio::time::sleep(remaining) => return Err(Interrupt::Expired),
            out = fut => out,
        };

        if self.cancel.is_cancelled() {
            return Err(Interrupt::Cancelled);
        }
        Ok(out)
    }

    async fn interrupted(&self, interrupt: Interrupt) -> Result<()> {
        match interrupt {
            Interrupt::Expired => {
                match self.ctx.expire_run(&self.run_id, RunStatus::InProgress).await {
                    Ok(_) | Err(EngineError::Conflict(_)) => {}
                    Err(e) => return Err(e),
                }
            }
            Interrupt::Cancelled if self.ctx.shutdown.is_cancelled() => {
                tracing::info!(run_id = %self.run_id, "run task stopped by shutdown");
            }
            Interrupt::Cancelled => {
                // Either a cancel request or the sweeper expiring the run
                let run = self.ctx.store.get_run(&self.run_id).await?;
                if run.status == RunStatus::Cancelling {
                    self.ctx.finalize_cancel(&self.run_id).await;
                }
            }
        }
        Ok(())
    }
}
