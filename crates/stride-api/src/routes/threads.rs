use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use std::sync::Arc;

use stride_types::{Metadata, Thread};

use crate::{error::ApiResult, state::AppState};

#[derive(Debug, Default, Deserialize)]
pub struct CreateThreadRequest {
    #[serde(default)]
    pub metadata: Metadata,
}

/// Create a new thread
pub async fn create_thread(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<CreateThreadRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Thread>)> {
    let req = match payload {
        Ok(Json(req)) => req,
        // A bare POST creates a thread without metadata
        Err(JsonRejection::MissingJsonContentType(_)) => CreateThreadRequest::default(),
        Err(rejection) => return Err(rejection.into()),
    };
    let thread = state.engine.create_thread(req.metadata).await?;

    Ok((StatusCode::CREATED, Json(thread)))
}

pub async fn get_thread(
    State(state): State<Arc<AppState>>,
    Path(thread_id): Path<String>,
) -> ApiResult<Json<Thread>> {
    Ok(Json(state.engine.get_thread(&thread_id).await?))
}

/// Delete a thread with its messages, runs and steps
pub async fn delete_thread(
    State(state): State<Arc<AppState>>,
    Path(thread_id): Path<String>,
) -> ApiResult<StatusCode> {
    state.engine.delete_thread(&thread_id).await?;

    Ok(StatusCode::NO_CONTENT)
}
