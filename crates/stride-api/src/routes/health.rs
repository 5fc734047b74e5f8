use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::state::AppState;

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub services: HashMap<String, String>,
}

/// Health check endpoint
///
/// Reports the store connection, registered tools and live run tasks
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let engine = &state.engine;
    let mut services = HashMap::new();

    let store = engine.store();
    let healthy = match store.ping().await {
        Ok(()) => {
            services.insert(store.backend().to_string(), "connected".to_string());
            true
        }
        Err(e) => {
            tracing::warn!(backend = store.backend(), error = %e, "store ping failed");
            services.insert(store.backend().to_string(), "disconnected".to_string());
            false
        }
    };

    services.insert(
        "tools".to_string(),
        format!("{} registered", engine.tools().names().len()),
    );
    services.insert("active_runs".to_string(), engine.active_tasks().to_string());

    Json(HealthResponse {
        status: if healthy { "healthy" } else { "degraded" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        services,
    })
}
