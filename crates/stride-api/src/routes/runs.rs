use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use std::sync::Arc;

use stride_engine::CreateRun;
use stride_types::{Run, RunStep, ToolOutput};

use crate::{error::ApiResult, state::AppState};

#[derive(Debug, Deserialize)]
pub struct SubmitToolOutputsRequest {
    pub tool_outputs: Vec<ToolOutput>,
}

/// Start a run; it is processed in the background
pub async fn create_run(
    State(state): State<Arc<AppState>>,
    Path(thread_id): Path<String>,
    payload: Result<Json<CreateRun>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Run>)> {
    let Json(req) = payload?;
    let run = state.engine.create_run(&thread_id, req).await?;

    Ok((StatusCode::CREATED, Json(run)))
}

pub async fn list_runs(
    State(state): State<Arc<AppState>>,
    Path(thread_id): Path<String>,
) -> ApiResult<Json<Vec<Run>>> {
    Ok(Json(state.engine.list_runs(&thread_id).await?))
}

/// Current run state. Clients poll this, so it is never cached.
pub async fn get_run(
    State(state): State<Arc<AppState>>,
    Path((thread_id, run_id)): Path<(String, String)>,
) -> ApiResult<impl IntoResponse> {
    let run = state.engine.get_thread_run(&thread_id, &run_id).await?;

    Ok(([(header::CACHE_CONTROL, "no-store")], Json(run)))
}

/// Answer the pending tool calls of a run in `requires_action`
pub async fn submit_tool_outputs(
    State(state): State<Arc<AppState>>,
    Path((thread_id, run_id)): Path<(String, String)>,
    payload: Result<Json<SubmitToolOutputsRequest>, JsonRejection>,
) -> ApiResult<Json<Run>> {
    let Json(req) = payload?;
    state.engine.get_thread_run(&thread_id, &run_id).await?;
    let run = state
        .engine
        .submit_tool_outputs(&run_id, req.tool_outputs)
        .await?;

    Ok(Json(run))
}

pub async fn cancel_run(
    State(state): State<Arc<AppState>>,
    Path((thread_id, run_id)): Path<(String, String)>,
) -> ApiResult<Json<Run>> {
    state.engine.get_thread_run(&thread_id, &run_id).await?;

    Ok(Json(state.engine.cancel_run(&run_id).await?))
}

pub async fn list_steps(
    State(state): State<Arc<AppState>>,
    Path((thread_id, run_id)): Path<(String, String)>,
) -> ApiResult<Json<Vec<RunStep>>> {
    Ok(Json(state.engine.list_run_steps(&thread_id, &run_id).await?))
}
