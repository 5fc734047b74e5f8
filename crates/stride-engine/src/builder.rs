use std::sync::Arc;

use stride_llm::LLMGateway;
use stride_persist::PersistenceStore;
use stride_tools::ToolRegistry;

use crate::engine::RunEngine;
use crate::error::{EngineError, Result};
use crate::types::EngineConfig;

/// Builder for a [`RunEngine`]. Store, gateway and tool registry are
/// required.
#[derive(Default)]
pub struct RunEngineBuilder {
    store: Option<Arc<dyn PersistenceStore>>,
    gateway: Option<Arc<dyn LLMGateway>>,
    tools: Option<Arc<ToolRegistry>>,
    config: EngineConfig,
}

impl RunEngineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store(mut self, store: Arc<dyn PersistenceStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn gateway(mut self, gateway: Arc<dyn LLMGateway>) -> Self {
        self.gateway = Some(gateway);
        self
    }

    pub fn tools(mut self, tools: Arc<ToolRegistry>) -> Self {
        self.tools = Some(tools);
        self
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Result<RunEngine> {
        let store = self
            .store
            .ok_or_else(|| EngineError::Setup("persistence store is required".into()))?;
        let gateway = self
            .gateway
            .ok_or_else(|| EngineError::Setup("LLM gateway is required".into()))?;
        let tools = self
            .tools
            .ok_or_else(|| EngineError::Setup("tool registry is required".into()))?;

        if self.config.max_rounds == 0 {
            return Err(EngineError::Setup("max_rounds must be at least 1".into()));
        }
        if self.config.sweep_interval.is_zero() {
            return Err(EngineError::Setup("sweep_interval must be positive".into()));
        }

        Ok(RunEngine::from_parts(store, gateway, tools, self.config))
    }
}
