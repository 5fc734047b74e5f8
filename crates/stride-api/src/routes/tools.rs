use axum::{extract::State, Json};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

use stride_tools::ToolPolicy;

use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct ToolResponse {
    pub name: String,
    pub description: String,
    pub parameters: Value,
    pub policy: ToolPolicy,
}

/// List registered tools with their execution policy
pub async fn list_tools(State(state): State<Arc<AppState>>) -> Json<Vec<ToolResponse>> {
    let registry = state.engine.tools();
    let tools = registry
        .specs()
        .into_iter()
        .map(|spec| ToolResponse {
            policy: registry.policy(&spec.name).unwrap_or_default(),
            name: spec.name,
            description: spec.description,
            parameters: spec.parameters,
        })
        .collect();

    Json(tools)
}
