//! HTTP facade over the Stride run engine.
//!
//! [`build_router`] wires every route onto a shared [`state::AppState`]; the
//! `stride-api` binary adds configuration, logging and the server loop.

pub mod config;
pub mod error;
pub mod middleware;
pub mod routes;
pub mod state;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    http::Method,
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::config::Config;
use crate::middleware::logging;
use crate::routes::{assistants, health, messages, runs, threads, tools};
use crate::state::AppState;

pub fn build_router(state: Arc<AppState>) -> Router {
    let timeout = Duration::from_secs(state.config.server.request_timeout_secs);

    Router::new()
        // Health
        .route("/health", get(health::health_check))
        .route("/tools", get(tools::list_tools))
        // Assistants
        .route("/assistants", post(assistants::create_assistant))
        .route("/assistants/:assistant_id", get(assistants::get_assistant))
        .route(
            "/assistants/:assistant_id/metadata",
            post(assistants::update_metadata),
        )
        // Threads
        .route("/threads", post(threads::create_thread))
        .route(
            "/threads/:thread_id",
            get(threads::get_thread).delete(threads::delete_thread),
        )
        // Messages
        .route(
            "/threads/:thread_id/messages",
            get(messages::list_messages).post(messages::create_message),
        )
        // Runs
        .route(
            "/threads/:thread_id/runs",
            get(runs::list_runs).post(runs::create_run),
        )
        .route("/threads/:thread_id/runs/:run_id", get(runs::get_run))
        .route(
            "/threads/:thread_id/runs/:run_id/submit_tool_outputs",
            post(runs::submit_tool_outputs),
        )
        .route("/threads/:thread_id/runs/:run_id/cancel", post(runs::cancel_run))
        .route("/threads/:thread_id/runs/:run_id/steps", get(runs::list_steps))
        .layer(axum_middleware::from_fn(logging::log_request))
        .layer(TimeoutLayer::new(timeout))
        .layer(CompressionLayer::new())
        .layer(build_cors_layer(&state.config))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn build_cors_layer(config: &Config) -> CorsLayer {
    if !config.cors.enabled {
        return CorsLayer::permissive();
    }

    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers(Any);

    if config.cors.origins.iter().any(|o| o == "*") {
        cors.allow_origin(Any)
    } else {
        let origins: Vec<axum::http::HeaderValue> = config
            .cors
            .origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        cors.allow_origin(origins)
    }
}
