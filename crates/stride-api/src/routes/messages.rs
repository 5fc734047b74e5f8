use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use std::sync::Arc;

use stride_persist::{MessageQuery, SortOrder};
use stride_types::{Message, MessageRole};

use crate::{error::ApiResult, state::AppState};

const MAX_LIMIT: usize = 100;

#[derive(Debug, Deserialize)]
pub struct CreateMessageRequest {
    #[serde(default = "default_role")]
    pub role: MessageRole,
    pub content: String,
}

fn default_role() -> MessageRole {
    MessageRole::User
}

#[derive(Debug, Deserialize)]
pub struct ListMessagesQuery {
    #[serde(default)]
    pub order: SortOrder,
    #[serde(default = "default_limit")]
    pub limit: usize,
    /// Exclusive message-id cursor
    pub after: Option<String>,
}

fn default_limit() -> usize {
    20
}

/// Append a message to a thread with no active run
pub async fn create_message(
    State(state): State<Arc<AppState>>,
    Path(thread_id): Path<String>,
    payload: Result<Json<CreateMessageRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Message>)> {
    let Json(req) = payload?;
    let message = state
        .engine
        .post_message(&thread_id, req.role, req.content)
        .await?;

    Ok((StatusCode::CREATED, Json(message)))
}

/// List a thread's messages in creation order
pub async fn list_messages(
    State(state): State<Arc<AppState>>,
    Path(thread_id): Path<String>,
    query: Result<Query<ListMessagesQuery>, QueryRejection>,
) -> ApiResult<Json<Vec<Message>>> {
    let Query(query) = query?;
    let mut page = MessageQuery {
        order: query.order,
        ..Default::default()
    }
    .limit(query.limit.clamp(1, MAX_LIMIT));
    if let Some(after) = query.after {
        page = page.after(after);
    }

    let messages = state.engine.list_messages(&thread_id, page).await?;

    Ok(Json(messages))
}
