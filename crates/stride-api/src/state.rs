use std::sync::Arc;

use stride_engine::RunEngine;

use crate::config::Config;

/// Shared application state passed to all handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub engine: RunEngine,
}

impl AppState {
    pub fn new(config: Config, engine: RunEngine) -> Self {
        Self {
            config: Arc::new(config),
            engine,
        }
    }
}
