use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::error::{Result, ToolError};

/// Read-only access to stored scripts, referenced by `script_id` in tool
/// arguments.
#[async_trait]
pub trait ScriptStore: Send + Sync {
    async fn get_script(&self, script_id: &str) -> Result<Option<String>>;
}

/// Script store backed by a map, for tests and single-node setups
#[derive(Default)]
pub struct InMemoryScriptStore {
    scripts: RwLock<HashMap<String, String>>,
}

impl InMemoryScriptStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, script_id: impl Into<String>, content: impl Into<String>) {
        self.scripts
            .write()
            .await
            .insert(script_id.into(), content.into());
    }
}

#[async_trait]
impl ScriptStore for InMemoryScriptStore {
    async fn get_script(&self, script_id: &str) -> Result<Option<String>> {
        Ok(self.scripts.read().await.get(script_id).cloned())
    }
}

/// Inline `script` wins; otherwise `script_id` is looked up
pub async fn resolve_script(tool: &str, args: &Value, store: &dyn ScriptStore) -> Result<String> {
    if let Some(script) = args.get("script").and_then(Value::as_str) {
        if script.trim().is_empty() {
            return Err(ToolError::invalid(tool, "'script' is empty"));
        }
        return Ok(script.to_string());
    }

    match args.get("script_id").and_then(Value::as_str) {
        Some(id) => store
            .get_script(id)
            .await?
            .ok_or_else(|| ToolError::ScriptNotFound(id.to_string())),
        None => Err(ToolError::invalid(tool, "provide either 'script' or 'script_id'")),
    }
}
