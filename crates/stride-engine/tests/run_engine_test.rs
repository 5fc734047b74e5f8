use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::json;
use stride_engine::{CreateAssistant, CreateRun, EngineConfig, EngineError, RunEngine};
use stride_llm::{ChatMessage, CompletionRequest, ProviderError, ScriptedGateway, ScriptedResponse};
use stride_persist::{
    MemoryStore, MessageQuery, PersistError, PersistenceStore, Result as PersistResult, RunFilter,
};
use stride_tools::{InMemoryScriptStore, ToolKind, ToolPolicies, ToolRegistry};
use stride_types::{
    Assistant, Message, MessageRole, Metadata, Run, RunErrorCode, RunPatch, RunStatus, RunStep,
    RunStepPatch, RunStepStatus, RunStepType, Thread, ToolCall, ToolOutput,
};
use tokio_test::assert_ok;

fn engine_with(
    gateway: Arc<ScriptedGateway>,
    policies: ToolPolicies,
    config: EngineConfig,
) -> RunEngine {
    let tools = ToolRegistry::with_builtins(
        gateway.clone(),
        "gpt-4o-mini",
        Arc::new(InMemoryScriptStore::new()),
        &policies,
    )
    .unwrap();

    RunEngine::builder()
        .store(Arc::new(MemoryStore::new()))
        .gateway(gateway)
        .tools(Arc::new(tools))
        .config(config)
        .build()
        .unwrap()
}

fn engine(gateway: Arc<ScriptedGateway>) -> RunEngine {
    engine_with(gateway, ToolPolicies::default(), EngineConfig::default())
}

async fn assistant(engine: &RunEngine, tools: &[&str]) -> Assistant {
    engine
        .create_assistant(
            CreateAssistant::new("PowerShell helper", "gpt-4o-mini")
                .instructions("You write safe PowerShell.")
                .tools(tools.iter().copied()),
        )
        .await
        .unwrap()
}

async fn thread_with(engine: &RunEngine, text: &str) -> Thread {
    let thread = engine.create_thread(Metadata::new()).await.unwrap();
    engine
        .post_message(&thread.id, MessageRole::User, text.to_string())
        .await
        .unwrap();
    thread
}

async fn wait_for(engine: &RunEngine, run_id: &str, status: RunStatus) -> Run {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let run = engine.get_run(run_id).await.unwrap();
        if run.status == status {
            return run;
        }
        assert!(
            Instant::now() < deadline,
            "run stuck in {} while waiting for {status}",
            run.status
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

fn security_call(id: &str) -> ToolCall {
    ToolCall::new(id, "security-analysis", json!({"script": "Get-ChildItem C:\\Temp"}))
}

#[tokio::test]
async fn test_direct_answer_completes_run() {
    let gateway = Arc::new(ScriptedGateway::new(vec![ScriptedResponse::message(
        "Get-ChildItem | Where-Object LastWriteTime -lt (Get-Date).AddDays(-30)",
    )]));
    let engine = engine(gateway.clone());
    let assistant = assistant(&engine, &["script-generation"]).await;
    let thread = thread_with(&engine, "list files older than 30 days").await;

    let run = engine
        .create_run(&thread.id, CreateRun::new(&assistant.id))
        .await
        .unwrap();
    assert_eq!(run.status, RunStatus::Queued);

    let run = wait_for(&engine, &run.id, RunStatus::Completed).await;
    assert!(run.completed_at.is_some());
    assert_eq!(run.round, 1);

    let messages = engine
        .store()
        .list_messages(&thread.id, MessageQuery::default())
        .await
        .unwrap();
    let roles: Vec<_> = messages.iter().map(|m| m.role).collect();
    assert_eq!(roles, [MessageRole::User, MessageRole::Assistant]);

    let request = &gateway.requests()[0];
    assert_eq!(request.instructions, "You write safe PowerShell.");
    assert_eq!(request.tools[0].name, "script-generation");

    let steps = engine.store().list_run_steps(&run.id).await.unwrap();
    assert_eq!(steps.len(), 1);
    assert_eq!(steps[0].step_type, RunStepType::MessageCreation);
    assert_eq!(steps[0].status, RunStepStatus::Completed);
}

#[tokio::test]
async fn test_tool_call_round_trip() {
    let gateway = Arc::new(ScriptedGateway::new(vec![
        ScriptedResponse::tool_calls(vec![security_call("c1")]),
        ScriptedResponse::message("The script is low risk."),
    ]));
    let engine = engine(gateway.clone());
    let assistant = assistant(&engine, &["security-analysis"]).await;
    let thread = thread_with(&engine, "is this script safe?").await;

    let run = engine
        .create_run(&thread.id, CreateRun::new(&assistant.id))
        .await
        .unwrap();
    let run = wait_for(&engine, &run.id, RunStatus::RequiresAction).await;
    assert_eq!(run.pending_call_ids(), ["c1"]);

    let resumed = engine
        .submit_tool_outputs(&run.id, vec![ToolOutput::new("c1", r#"{"risk_level":"low"}"#)])
        .await
        .unwrap();
    assert_eq!(resumed.status, RunStatus::InProgress);
    assert!(resumed.required_action.is_none());

    let run = wait_for(&engine, &run.id, RunStatus::Completed).await;
    assert_eq!(run.round, 2);

    let messages = engine
        .store()
        .list_messages(&thread.id, MessageQuery::default())
        .await
        .unwrap();
    let roles: Vec<_> = messages.iter().map(|m| m.role).collect();
    assert_eq!(
        roles,
        [
            MessageRole::User,
            MessageRole::Assistant,
            MessageRole::Tool,
            MessageRole::Assistant
        ]
    );
    assert_eq!(messages[2].tool_call_id.as_deref(), Some("c1"));
    assert_eq!(messages[1].tool_calls.as_ref().map(Vec::len), Some(1));

    let steps = engine.store().list_run_steps(&run.id).await.unwrap();
    let kinds: Vec<_> = steps.iter().map(|s| s.step_type).collect();
    assert_eq!(
        kinds,
        [
            RunStepType::MessageCreation,
            RunStepType::ToolCalls,
            RunStepType::MessageCreation
        ]
    );
    assert!(steps.iter().all(|s| s.status == RunStepStatus::Completed));
    assert_eq!(gateway.requests()[1].messages.len(), 3);
}

#[tokio::test]
async fn test_submit_after_completion_is_rejected() {
    let gateway = Arc::new(ScriptedGateway::new(vec![ScriptedResponse::message("done")]));
    let engine = engine(gateway);
    let assistant = assistant(&engine, &[]).await;
    let thread = thread_with(&engine, "hi").await;

    let run = engine
        .create_run(&thread.id, CreateRun::new(&assistant.id))
        .await
        .unwrap();
    let before = wait_for(&engine, &run.id, RunStatus::Completed).await;

    let err = engine
        .submit_tool_outputs(&run.id, vec![ToolOutput::new("c1", "x")])
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidRequest(_)));
    assert_eq!(engine.get_run(&run.id).await.unwrap(), before);
}

#[tokio::test]
async fn test_second_run_on_busy_thread_conflicts() {
    let gateway = Arc::new(ScriptedGateway::new(vec![ScriptedResponse::delayed(
        Duration::from_secs(2),
        ScriptedResponse::message("slow"),
    )]));
    let engine = engine(gateway);
    let assistant = assistant(&engine, &[]).await;
    let thread = thread_with(&engine, "hi").await;

    let first = engine
        .create_run(&thread.id, CreateRun::new(&assistant.id))
        .await
        .unwrap();
    wait_for(&engine, &first.id, RunStatus::InProgress).await;

    let err = engine
        .create_run(&thread.id, CreateRun::new(&assistant.id))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::ActiveRun { ref run_id, .. } if *run_id == first.id));

    let err = engine
        .post_message(&thread.id, MessageRole::User, "more".into())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::ActiveRun { .. }));

    engine.shutdown();
}

#[tokio::test]
async fn test_run_expires_mid_call() {
    let gateway = Arc::new(ScriptedGateway::new(vec![ScriptedResponse::delayed(
        Duration::from_secs(5),
        ScriptedResponse::message("too late"),
    )]));
    let engine = engine_with(
        gateway,
        ToolPolicies::default(),
        EngineConfig::default().with_run_ttl(Duration::from_millis(200)),
    );
    let assistant = assistant(&engine, &[]).await;
    let thread = thread_with(&engine, "hi").await;

    let run = engine
        .create_run(&thread.id, CreateRun::new(&assistant.id))
        .await
        .unwrap();
    let expired = wait_for(&engine, &run.id, RunStatus::Expired).await;

    let error = expired.last_error.clone().unwrap();
    assert_eq!(error.code, RunErrorCode::RunExpired);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(engine.get_run(&run.id).await.unwrap(), expired);
    assert_eq!(engine.sweep_expired().await.unwrap(), 0);

    let steps = engine.store().list_run_steps(&run.id).await.unwrap();
    assert_eq!(steps[0].status, RunStepStatus::Expired);
}

#[tokio::test]
async fn test_partial_submission_leaves_run_waiting() {
    let gateway = Arc::new(
        ScriptedGateway::new(vec![ScriptedResponse::tool_calls(vec![
            security_call("c1"),
            security_call("c2"),
        ])])
        .with_fallback(ScriptedResponse::message("both checked")),
    );
    let engine = engine(gateway);
    let assistant = assistant(&engine, &["security-analysis"]).await;
    let thread = thread_with(&engine, "check these").await;

    let run = engine
        .create_run(&thread.id, CreateRun::new(&assistant.id))
        .await
        .unwrap();
    let waiting = wait_for(&engine, &run.id, RunStatus::RequiresAction).await;

    let err = engine
        .submit_tool_outputs(&run.id, vec![ToolOutput::new("c1", "ok")])
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidRequest(ref msg) if msg.contains("c2")));
    assert_eq!(engine.get_run(&run.id).await.unwrap(), waiting);

    let err = engine
        .submit_tool_outputs(
            &run.id,
            vec![
                ToolOutput::new("c1", "ok"),
                ToolOutput::new("c2", "ok"),
                ToolOutput::new("c3", "ok"),
            ],
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidRequest(_)));

    engine
        .submit_tool_outputs(
            &run.id,
            vec![ToolOutput::new("c2", "ok"), ToolOutput::new("c1", "ok")],
        )
        .await
        .unwrap();
    wait_for(&engine, &run.id, RunStatus::Completed).await;

    let messages = engine
        .store()
        .list_messages(&thread.id, MessageQuery::default())
        .await
        .unwrap();
    let answered: Vec<_> = messages
        .iter()
        .filter_map(|m| m.tool_call_id.as_deref())
        .collect();
    assert_eq!(answered, ["c1", "c2"]);
}

#[tokio::test]
async fn test_auto_execute_tools_loop_back_to_model() {
    let gateway = Arc::new(ScriptedGateway::new(vec![
        ScriptedResponse::tool_calls(vec![
            ToolCall::new("c1", "documentation-search", json!({"query": "Get-Service"})),
            ToolCall::new("c2", "documentation-search", json!({"limit": 2})),
        ]),
        ScriptedResponse::message("Use Get-Service."),
    ]));
    let engine = engine_with(
        gateway.clone(),
        ToolPolicies::auto_execute(&[ToolKind::DocumentationSearch]),
        EngineConfig::default(),
    );
    let assistant = assistant(&engine, &["documentation-search"]).await;
    let thread = thread_with(&engine, "how do I list services?").await;

    let run = engine
        .create_run(&thread.id, CreateRun::new(&assistant.id))
        .await
        .unwrap();
    let run = wait_for(&engine, &run.id, RunStatus::Completed).await;
    assert!(run.required_action.is_none());

    let messages = engine
        .store()
        .list_messages(&thread.id, MessageQuery::default())
        .await
        .unwrap();
    let tool_messages: Vec<_> = messages
        .iter()
        .filter(|m| m.role == MessageRole::Tool)
        .collect();
    assert_eq!(tool_messages.len(), 2);

    let rejected = tool_messages
        .iter()
        .find(|m| m.tool_call_id.as_deref() == Some("c2"))
        .unwrap();
    let body: serde_json::Value = serde_json::from_str(&rejected.content).unwrap();
    assert!(body["error"].as_str().unwrap().contains("query"));

    let found = tool_messages
        .iter()
        .find(|m| m.tool_call_id.as_deref() == Some("c1"))
        .unwrap();
    assert!(found.content.contains("Get-Service"));

    assert_eq!(gateway.call_count(), 2);
}

#[tokio::test]
async fn test_round_limit_fails_run() {
    let gateway = Arc::new(ScriptedGateway::new(vec![]).with_fallback(
        ScriptedResponse::tool_calls(vec![ToolCall::new(
            "c1",
            "documentation-search",
            json!({"query": "loop"}),
        )]),
    ));
    let engine = engine_with(
        gateway.clone(),
        ToolPolicies::auto_execute(&[ToolKind::DocumentationSearch]),
        EngineConfig::default().with_max_rounds(2),
    );
    let assistant = assistant(&engine, &["documentation-search"]).await;
    let thread = thread_with(&engine, "loop forever").await;

    let run = engine
        .create_run(&thread.id, CreateRun::new(&assistant.id))
        .await
        .unwrap();
    let run = wait_for(&engine, &run.id, RunStatus::Failed).await;

    assert_eq!(
        run.last_error.map(|e| e.code),
        Some(RunErrorCode::MaxRoundsExceeded)
    );
    assert_eq!(gateway.call_count(), 2);
}

#[tokio::test]
async fn test_provider_error_fails_run() {
    let gateway = Arc::new(ScriptedGateway::new(vec![ScriptedResponse::Error(
        ProviderError::Auth("invalid api key".into()),
    )]));
    let engine = engine(gateway);
    let assistant = assistant(&engine, &[]).await;
    let thread = thread_with(&engine, "hi").await;

    let run = engine
        .create_run(&thread.id, CreateRun::new(&assistant.id))
        .await
        .unwrap();
    let run = wait_for(&engine, &run.id, RunStatus::Failed).await;

    let error = run.last_error.unwrap();
    assert_eq!(error.code, RunErrorCode::AuthenticationFailed);
    assert!(run.failed_at.is_some());

    let steps = engine.store().list_run_steps(&run.id).await.unwrap();
    assert_eq!(steps[0].status, RunStepStatus::Failed);
}

#[tokio::test]
async fn test_cancel_in_flight_run() {
    let gateway = Arc::new(ScriptedGateway::new(vec![ScriptedResponse::delayed(
        Duration::from_millis(300),
        ScriptedResponse::message("never seen"),
    )]));
    let engine = engine_with(
        gateway.clone(),
        ToolPolicies::default(),
        EngineConfig::default().with_cancel_grace(Duration::from_secs(2)),
    );
    let assistant = assistant(&engine, &[]).await;
    let thread = thread_with(&engine, "hi").await;

    let run = engine
        .create_run(&thread.id, CreateRun::new(&assistant.id))
        .await
        .unwrap();
    wait_for(&engine, &run.id, RunStatus::InProgress).await;

    let requested = Instant::now();
    let cancelling = engine.cancel_run(&run.id).await.unwrap();
    assert_eq!(cancelling.status, RunStatus::Cancelling);

    // The model call is allowed to finish first
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(
        engine.get_run(&run.id).await.unwrap().status,
        RunStatus::Cancelling
    );
    assert_eq!(engine.cancel_run(&run.id).await.unwrap().status, RunStatus::Cancelling);

    let cancelled = wait_for(&engine, &run.id, RunStatus::Cancelled).await;
    let took = requested.elapsed();
    assert!(took >= Duration::from_millis(200), "finalized after {took:?}");
    assert!(took < Duration::from_secs(2), "finalized after {took:?}");
    assert!(cancelled.cancelled_at.is_some());
    assert_eq!(
        cancelled.last_error.map(|e| e.code),
        Some(RunErrorCode::RunCancelled)
    );
    assert_eq!(gateway.call_count(), 1);

    let messages = engine
        .store()
        .list_messages(&thread.id, MessageQuery::default())
        .await
        .unwrap();
    assert!(messages.iter().all(|m| m.role == MessageRole::User));

    let err = engine.cancel_run(&run.id).await.unwrap_err();
    assert!(matches!(err, EngineError::InvalidRequest(_)));

    // The thread accepts work again
    engine
        .post_message(&thread.id, MessageRole::User, "next".into())
        .await
        .unwrap();
}

#[tokio::test]
async fn test_cancel_grace_bounds_a_slow_call() {
    let gateway = Arc::new(ScriptedGateway::new(vec![ScriptedResponse::delayed(
        Duration::from_secs(5),
        ScriptedResponse::message("never seen"),
    )]));
    let engine = engine_with(
        gateway,
        ToolPolicies::default(),
        EngineConfig::default().with_cancel_grace(Duration::from_millis(100)),
    );
    let assistant = assistant(&engine, &[]).await;
    let thread = thread_with(&engine, "hi").await;

    let run = engine
        .create_run(&thread.id, CreateRun::new(&assistant.id))
        .await
        .unwrap();
    wait_for(&engine, &run.id, RunStatus::InProgress).await;

    let requested = Instant::now();
    assert_ok!(engine.cancel_run(&run.id).await);
    wait_for(&engine, &run.id, RunStatus::Cancelled).await;
    assert!(requested.elapsed() < Duration::from_secs(2));

    let steps = engine.store().list_run_steps(&run.id).await.unwrap();
    assert!(steps.iter().all(|s| s.status == RunStepStatus::Cancelled));

    engine.shutdown();
}

#[tokio::test]
async fn test_cancel_waiting_run_is_immediate() {
    let gateway = Arc::new(ScriptedGateway::new(vec![ScriptedResponse::tool_calls(
        vec![security_call("c1")],
    )]));
    let engine = engine(gateway);
    let assistant = assistant(&engine, &["security-analysis"]).await;
    let thread = thread_with(&engine, "hi").await;

    let run = engine
        .create_run(&thread.id, CreateRun::new(&assistant.id))
        .await
        .unwrap();
    wait_for(&engine, &run.id, RunStatus::RequiresAction).await;

    let run = engine.cancel_run(&run.id).await.unwrap();
    assert_eq!(run.status, RunStatus::Cancelled);
    assert!(run.required_action.is_none());

    let steps = engine.store().list_run_steps(&run.id).await.unwrap();
    assert!(steps.iter().all(|s| s.status.is_terminal()));
}

#[tokio::test]
async fn test_sweeper_expires_waiting_runs() {
    let gateway = Arc::new(ScriptedGateway::new(vec![ScriptedResponse::tool_calls(
        vec![security_call("c1")],
    )]));
    let engine = engine_with(
        gateway,
        ToolPolicies::default(),
        EngineConfig::default().with_run_ttl(Duration::from_millis(300)),
    );
    let assistant = assistant(&engine, &["security-analysis"]).await;
    let thread = thread_with(&engine, "hi").await;

    let run = engine
        .create_run(&thread.id, CreateRun::new(&assistant.id))
        .await
        .unwrap();
    wait_for(&engine, &run.id, RunStatus::RequiresAction).await;
    tokio::time::sleep(Duration::from_millis(400)).await;

    assert_eq!(engine.sweep_expired().await.unwrap(), 1);
    assert_eq!(engine.sweep_expired().await.unwrap(), 0);

    let run = engine.get_run(&run.id).await.unwrap();
    assert_eq!(run.status, RunStatus::Expired);

    let err = engine
        .submit_tool_outputs(&run.id, vec![ToolOutput::new("c1", "late")])
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidRequest(_)));
}

#[tokio::test]
async fn test_background_sweeper_stops_on_shutdown() {
    let gateway = Arc::new(ScriptedGateway::new(vec![]));
    let engine = engine_with(
        gateway,
        ToolPolicies::default(),
        EngineConfig::default().with_sweep_interval(Duration::from_millis(20)),
    );

    let sweeper = engine.spawn_sweeper();
    tokio::time::sleep(Duration::from_millis(50)).await;
    engine.shutdown();

    tokio::time::timeout(Duration::from_secs(1), sweeper)
        .await
        .expect("sweeper should stop")
        .unwrap();
}

#[tokio::test]
async fn test_assistant_validation() {
    let engine = engine(Arc::new(ScriptedGateway::new(vec![])));

    let err = engine
        .create_assistant(CreateAssistant::new("a", "gpt-4o-mini").tools(["format-disk"]))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation(ref msg) if msg.contains("format-disk")));

    let err = engine
        .create_assistant(CreateAssistant::new("", "gpt-4o-mini"))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));

    let err = engine
        .create_assistant(
            CreateAssistant::new("a", "gpt-4o-mini")
                .tools(["quality-analysis", "quality-analysis"]),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));
}

#[tokio::test]
async fn test_tool_role_messages_rejected_from_clients() {
    let engine = engine(Arc::new(ScriptedGateway::new(vec![])));
    let thread = engine.create_thread(Metadata::new()).await.unwrap();

    let err = engine
        .post_message(&thread.id, MessageRole::Tool, "{}".into())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));

    let err = engine
        .post_message("thread_missing", MessageRole::User, "hi".into())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NotFound(_)));
}

#[tokio::test]
async fn test_run_overrides_assistant_defaults() {
    let gateway = Arc::new(ScriptedGateway::new(vec![ScriptedResponse::message("ok")]));
    let engine = engine(gateway.clone());
    let assistant = assistant(&engine, &[]).await;
    let thread = thread_with(&engine, "hi").await;

    let request = CreateRun {
        model: Some("gpt-4o".into()),
        instructions: Some("Answer briefly.".into()),
        ..CreateRun::new(&assistant.id)
    };
    let run = engine.create_run(&thread.id, request).await.unwrap();
    wait_for(&engine, &run.id, RunStatus::Completed).await;

    let sent = &gateway.requests()[0];
    assert_eq!(sent.model, "gpt-4o");
    assert_eq!(sent.instructions, "Answer briefly.");
}

#[tokio::test]
async fn test_thread_scoped_reads_and_delete() {
    let gateway = Arc::new(ScriptedGateway::new(vec![ScriptedResponse::tool_calls(
        vec![security_call("c1")],
    )]));
    let engine = engine(gateway);
    let assistant = assistant(&engine, &["security-analysis"]).await;
    let thread = thread_with(&engine, "check this").await;
    let other = engine.create_thread(Metadata::new()).await.unwrap();

    let run = engine
        .create_run(&thread.id, CreateRun::new(&assistant.id))
        .await
        .unwrap();
    wait_for(&engine, &run.id, RunStatus::RequiresAction).await;

    let err = engine.get_thread_run(&other.id, &run.id).await.unwrap_err();
    assert!(matches!(err, EngineError::NotFound(_)));
    assert_eq!(engine.list_runs(&thread.id).await.unwrap().len(), 1);
    assert!(engine.list_runs(&other.id).await.unwrap().is_empty());
    assert_eq!(
        engine.list_run_steps(&thread.id, &run.id).await.unwrap().len(),
        2
    );

    let err = engine.delete_thread(&thread.id).await.unwrap_err();
    assert!(matches!(err, EngineError::ActiveRun { .. }));

    assert_ok!(engine.cancel_run(&run.id).await);
    assert_ok!(engine.delete_thread(&thread.id).await);

    let err = engine
        .list_messages(&thread.id, MessageQuery::default())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NotFound(_)));
}

/// Tool replies the next model request carries, as `(call id, content)`
fn tool_replies(request: &CompletionRequest) -> Vec<(String, String)> {
    request
        .messages
        .iter()
        .filter_map(|m| match m {
            ChatMessage::Tool {
                tool_call_id,
                content,
            } => Some((tool_call_id.clone(), content.clone())),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_cancelled_tool_calls_are_answered_in_history() {
    let gateway = Arc::new(ScriptedGateway::new(vec![
        ScriptedResponse::tool_calls(vec![security_call("c1")]),
        ScriptedResponse::message("Starting over."),
    ]));
    let engine = engine(gateway.clone());
    let assistant = assistant(&engine, &["security-analysis"]).await;
    let thread = thread_with(&engine, "check this").await;

    let first = engine
        .create_run(&thread.id, CreateRun::new(&assistant.id))
        .await
        .unwrap();
    wait_for(&engine, &first.id, RunStatus::RequiresAction).await;
    let cancelled = engine.cancel_run(&first.id).await.unwrap();
    assert_eq!(cancelled.status, RunStatus::Cancelled);

    engine
        .post_message(&thread.id, MessageRole::User, "never mind".into())
        .await
        .unwrap();
    let second = engine
        .create_run(&thread.id, CreateRun::new(&assistant.id))
        .await
        .unwrap();
    wait_for(&engine, &second.id, RunStatus::Completed).await;

    let request = &gateway.requests()[1];
    let roles: Vec<_> = request
        .messages
        .iter()
        .map(|m| match m {
            ChatMessage::System { .. } => "system",
            ChatMessage::Human { .. } => "user",
            ChatMessage::AI { .. } => "assistant",
            ChatMessage::Tool { .. } => "tool",
        })
        .collect();
    assert_eq!(roles, ["user", "assistant", "tool", "user"]);

    let replies = tool_replies(request);
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].0, "c1");
    let body: serde_json::Value = serde_json::from_str(&replies[0].1).unwrap();
    assert_eq!(body["error"], "run cancelled");
}

#[tokio::test]
async fn test_expired_tool_calls_are_answered_in_history() {
    let gateway = Arc::new(ScriptedGateway::new(vec![
        ScriptedResponse::tool_calls(vec![security_call("c1"), security_call("c2")]),
        ScriptedResponse::message("Starting over."),
    ]));
    let engine = engine_with(
        gateway.clone(),
        ToolPolicies::default(),
        EngineConfig::default().with_run_ttl(Duration::from_millis(300)),
    );
    let assistant = assistant(&engine, &["security-analysis"]).await;
    let thread = thread_with(&engine, "check these").await;

    let first = engine
        .create_run(&thread.id, CreateRun::new(&assistant.id))
        .await
        .unwrap();
    wait_for(&engine, &first.id, RunStatus::RequiresAction).await;
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(engine.sweep_expired().await.unwrap(), 1);

    engine
        .post_message(&thread.id, MessageRole::User, "try again".into())
        .await
        .unwrap();
    let second = engine
        .create_run(&thread.id, CreateRun::new(&assistant.id))
        .await
        .unwrap();
    wait_for(&engine, &second.id, RunStatus::Completed).await;

    let replies = tool_replies(&gateway.requests()[1]);
    let ids: Vec<_> = replies.iter().map(|(id, _)| id.as_str()).collect();
    assert_eq!(ids, ["c1", "c2"]);
    assert!(replies.iter().all(|(_, content)| content.contains("run expired")));
}

/// Park a run in `cancelling` with no task behind it
async fn orphaned_cancellation(engine: &RunEngine, thread: &Thread, assistant: &Assistant) -> Run {
    let run = Run::queued(
        &thread.id,
        &assistant.id,
        "gpt-4o-mini",
        "",
        chrono::Duration::milliseconds(100),
    );
    let run = engine.store().insert_run(run).await.unwrap();
    engine
        .store()
        .update_run(&run.id, RunPatch::status(RunStatus::Cancelling))
        .await
        .unwrap()
}

#[tokio::test]
async fn test_sweeper_finalizes_orphaned_cancellation() {
    let gateway = Arc::new(ScriptedGateway::new(vec![ScriptedResponse::message("ok")]));
    let engine = engine(gateway);
    let assistant = assistant(&engine, &[]).await;
    let thread = thread_with(&engine, "hi").await;

    let stuck = orphaned_cancellation(&engine, &thread, &assistant).await;
    tokio::time::sleep(Duration::from_millis(150)).await;

    let err = engine
        .create_run(&thread.id, CreateRun::new(&assistant.id))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::ActiveRun { .. }));

    assert_eq!(engine.sweep_expired().await.unwrap(), 1);
    assert_eq!(engine.sweep_expired().await.unwrap(), 0);
    let run = engine.get_run(&stuck.id).await.unwrap();
    assert_eq!(run.status, RunStatus::Cancelled);

    let next = engine
        .create_run(&thread.id, CreateRun::new(&assistant.id))
        .await
        .unwrap();
    wait_for(&engine, &next.id, RunStatus::Completed).await;
}

#[tokio::test]
async fn test_cancel_finalizes_orphaned_cancellation() {
    let engine = engine(Arc::new(ScriptedGateway::new(vec![])));
    let assistant = assistant(&engine, &[]).await;
    let thread = thread_with(&engine, "hi").await;

    let stuck = orphaned_cancellation(&engine, &thread, &assistant).await;
    let run = engine.cancel_run(&stuck.id).await.unwrap();
    assert_eq!(run.status, RunStatus::Cancelled);
    assert_ok!(
        engine
            .post_message(&thread.id, MessageRole::User, "again".into())
            .await
    );
}

/// Memory store whose tool-message writes can be made to fail
struct FlakyStore {
    inner: MemoryStore,
    fail_tool_writes: AtomicBool,
}

#[async_trait]
impl PersistenceStore for FlakyStore {
    async fn create_assistant(&self, assistant: Assistant) -> PersistResult<Assistant> {
        self.inner.create_assistant(assistant).await
    }

    async fn get_assistant(&self, assistant_id: &str) -> PersistResult<Assistant> {
        self.inner.get_assistant(assistant_id).await
    }

    async fn update_assistant_metadata(
        &self,
        assistant_id: &str,
        metadata: Metadata,
    ) -> PersistResult<Assistant> {
        self.inner
            .update_assistant_metadata(assistant_id, metadata)
            .await
    }

    async fn create_thread(&self, thread: Thread) -> PersistResult<Thread> {
        self.inner.create_thread(thread).await
    }

    async fn get_thread(&self, thread_id: &str) -> PersistResult<Thread> {
        self.inner.get_thread(thread_id).await
    }

    async fn delete_thread(&self, thread_id: &str) -> PersistResult<()> {
        self.inner.delete_thread(thread_id).await
    }

    async fn append_message(&self, message: Message) -> PersistResult<Message> {
        if message.role == MessageRole::Tool && self.fail_tool_writes.load(Ordering::SeqCst) {
            return Err(PersistError::Connection("write timed out".into()));
        }
        self.inner.append_message(message).await
    }

    async fn list_messages(
        &self,
        thread_id: &str,
        query: MessageQuery,
    ) -> PersistResult<Vec<Message>> {
        self.inner.list_messages(thread_id, query).await
    }

    async fn insert_run(&self, run: Run) -> PersistResult<Run> {
        self.inner.insert_run(run).await
    }

    async fn get_run(&self, run_id: &str) -> PersistResult<Run> {
        self.inner.get_run(run_id).await
    }

    async fn update_run(&self, run_id: &str, patch: RunPatch) -> PersistResult<Run> {
        self.inner.update_run(run_id, patch).await
    }

    async fn list_runs(&self, filter: RunFilter) -> PersistResult<Vec<Run>> {
        self.inner.list_runs(filter).await
    }

    async fn create_run_step(&self, step: RunStep) -> PersistResult<RunStep> {
        self.inner.create_run_step(step).await
    }

    async fn update_run_step(&self, step_id: &str, patch: RunStepPatch) -> PersistResult<RunStep> {
        self.inner.update_run_step(step_id, patch).await
    }

    async fn list_run_steps(&self, run_id: &str) -> PersistResult<Vec<RunStep>> {
        self.inner.list_run_steps(run_id).await
    }

    async fn ping(&self) -> PersistResult<()> {
        self.inner.ping().await
    }

    fn backend(&self) -> &'static str {
        "flaky"
    }
}

#[tokio::test]
async fn test_failed_output_write_leaves_run_waiting() {
    let gateway = Arc::new(ScriptedGateway::new(vec![
        ScriptedResponse::tool_calls(vec![security_call("c1"), security_call("c2")]),
        ScriptedResponse::message("Both are fine."),
    ]));
    let store = Arc::new(FlakyStore {
        inner: MemoryStore::new(),
        fail_tool_writes: AtomicBool::new(false),
    });
    let tools = ToolRegistry::with_builtins(
        gateway.clone(),
        "gpt-4o-mini",
        Arc::new(InMemoryScriptStore::new()),
        &ToolPolicies::default(),
    )
    .unwrap();
    let engine = RunEngine::builder()
        .store(store.clone())
        .gateway(gateway)
        .tools(Arc::new(tools))
        .build()
        .unwrap();
    let assistant = assistant(&engine, &["security-analysis"]).await;
    let thread = thread_with(&engine, "check these").await;

    let run = engine
        .create_run(&thread.id, CreateRun::new(&assistant.id))
        .await
        .unwrap();
    wait_for(&engine, &run.id, RunStatus::RequiresAction).await;

    let outputs = vec![ToolOutput::new("c1", "ok"), ToolOutput::new("c2", "ok")];
    store.fail_tool_writes.store(true, Ordering::SeqCst);
    let err = engine
        .submit_tool_outputs(&run.id, outputs.clone())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Store(_)));

    let waiting = engine.get_run(&run.id).await.unwrap();
    assert_eq!(waiting.status, RunStatus::RequiresAction);
    assert_eq!(waiting.pending_call_ids(), ["c1", "c2"]);

    store.fail_tool_writes.store(false, Ordering::SeqCst);
    assert_ok!(engine.submit_tool_outputs(&run.id, outputs).await);
    wait_for(&engine, &run.id, RunStatus::Completed).await;

    let messages = engine
        .store()
        .list_messages(&thread.id, MessageQuery::default())
        .await
        .unwrap();
    let answered: Vec<_> = messages
        .iter()
        .filter_map(|m| m.tool_call_id.as_deref())
        .collect();
    assert_eq!(answered, ["c1", "c2"]);
}

#[tokio::test]
async fn test_zero_sweep_interval_is_rejected() {
    let gateway = Arc::new(ScriptedGateway::new(vec![]));
    let tools = ToolRegistry::with_builtins(
        gateway.clone(),
        "gpt-4o-mini",
        Arc::new(InMemoryScriptStore::new()),
        &ToolPolicies::default(),
    )
    .unwrap();

    let result = RunEngine::builder()
        .store(Arc::new(MemoryStore::new()))
        .gateway(gateway)
        .tools(Arc::new(tools))
        .config(EngineConfig::default().with_sweep_interval(Duration::ZERO))
        .build();
    assert!(matches!(result, Err(EngineError::Setup(ref msg)) if msg.contains("sweep_interval")));
}
