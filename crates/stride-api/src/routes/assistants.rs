use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use std::sync::Arc;

use stride_engine::CreateAssistant;
use stride_types::{Assistant, Metadata};

use crate::{error::ApiResult, state::AppState};

#[derive(Debug, Deserialize)]
pub struct UpdateMetadataRequest {
    pub metadata: Metadata,
}

/// Create an assistant bound to registered tools
pub async fn create_assistant(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<CreateAssistant>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Assistant>)> {
    let Json(req) = payload?;
    let assistant = state.engine.create_assistant(req).await?;

    Ok((StatusCode::CREATED, Json(assistant)))
}

pub async fn get_assistant(
    State(state): State<Arc<AppState>>,
    Path(assistant_id): Path<String>,
) -> ApiResult<Json<Assistant>> {
    Ok(Json(state.engine.get_assistant(&assistant_id).await?))
}

/// Replace an assistant's metadata
pub async fn update_metadata(
    State(state): State<Arc<AppState>>,
    Path(assistant_id): Path<String>,
    payload: Result<Json<UpdateMetadataRequest>, JsonRejection>,
) -> ApiResult<Json<Assistant>> {
    let Json(req) = payload?;
    let assistant = state
        .engine
        .update_assistant_metadata(&assistant_id, req.metadata)
        .await?;

    Ok(Json(assistant))
}
