use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::json;
use stride_llm::LLMGateway;
use stride_types::{ToolCall, ToolOutput, ToolSpec};

use crate::builtin::{
    DocumentationSearchTool, QualityAnalysisTool, ScriptGenerationTool, SecurityAnalysisTool,
};
use crate::error::{Result, ToolError};
use crate::schema;
use crate::script_store::ScriptStore;
use crate::tool::{Tool, ToolKind, ToolPolicies, ToolPolicy};

struct Entry {
    tool: Arc<dyn Tool>,
    policy: ToolPolicy,
}

/// Immutable set of tools available to runs, keyed by [`ToolKind`].
pub struct ToolRegistry {
    tools: BTreeMap<ToolKind, Entry>,
}

#[derive(Default)]
pub struct ToolRegistryBuilder {
    tools: BTreeMap<ToolKind, Entry>,
}

impl ToolRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, tool: Arc<dyn Tool>, policy: ToolPolicy) -> Result<Self> {
        let kind = tool.kind();
        if self.tools.contains_key(&kind) {
            return Err(ToolError::DuplicateTool(kind.name().to_string()));
        }
        self.tools.insert(kind, Entry { tool, policy });
        Ok(self)
    }

    pub fn build(self) -> ToolRegistry {
        ToolRegistry { tools: self.tools }
    }
}

impl ToolRegistry {
    pub fn builder() -> ToolRegistryBuilder {
        ToolRegistryBuilder::new()
    }

    /// Registry holding all four built-in tools
    pub fn with_builtins(
        gateway: Arc<dyn LLMGateway>,
        generation_model: impl Into<String>,
        scripts: Arc<dyn ScriptStore>,
        policies: &ToolPolicies,
    ) -> Result<Self> {
        let tools: [Arc<dyn Tool>; 4] = [
            Arc::new(ScriptGenerationTool::new(gateway, generation_model)),
            Arc::new(SecurityAnalysisTool::new(scripts.clone())),
            Arc::new(QualityAnalysisTool::new(scripts)),
            Arc::new(DocumentationSearchTool),
        ];

        let mut builder = Self::builder();
        for tool in tools {
            let policy = policies.policy_for(tool.kind());
            builder = builder.register(tool, policy)?;
        }
        Ok(builder.build())
    }

    fn lookup(&self, name: &str) -> Result<&Entry> {
        ToolKind::from_name(name)
            .and_then(|kind| self.tools.get(&kind))
            .ok_or_else(|| ToolError::UnknownTool(name.to_string()))
    }

    pub fn get(&self, kind: ToolKind) -> Option<Arc<dyn Tool>> {
        self.tools.get(&kind).map(|e| e.tool.clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.lookup(name).is_ok()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.tools.keys().map(ToolKind::name).collect()
    }

    pub fn specs(&self) -> Vec<ToolSpec> {
        self.tools.values().map(|e| e.tool.spec()).collect()
    }

    /// Specs for the given names, in the given order
    pub fn resolve_specs(&self, names: &[String]) -> Result<Vec<ToolSpec>> {
        names
            .iter()
            .map(|name| self.lookup(name).map(|e| e.tool.spec()))
            .collect()
    }

    /// Policy for a registered tool. Unknown names have none.
    pub fn policy(&self, name: &str) -> Option<ToolPolicy> {
        self.lookup(name).ok().map(|e| e.policy)
    }

    /// Check that the call names a registered tool and its arguments match
    /// the tool's schema.
    pub fn validate_call(&self, call: &ToolCall) -> Result<()> {
        let entry = self.lookup(&call.tool_name)?;
        schema::validate(&entry.tool.parameters(), &call.arguments)
            .map_err(|v| ToolError::invalid(&call.tool_name, v.to_string()))
    }

    /// Validate and run a call. Failures are reported to the model as an
    /// `{"error": ...}` output rather than aborting the run.
    pub async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let output = match self.try_execute(call).await {
            Ok(value) => value.to_string(),
            Err(e) => {
                tracing::warn!(
                    tool = %call.tool_name,
                    tool_call_id = %call.id,
                    error = %e,
                    "tool execution failed"
                );
                json!({ "error": e.to_string() }).to_string()
            }
        };
        ToolOutput::new(&call.id, output)
    }

    async fn try_execute(&self, call: &ToolCall) -> Result<serde_json::Value> {
        self.validate_call(call)?;
        let entry = self.lookup(&call.tool_name)?;
        tracing::debug!(tool = %call.tool_name, tool_call_id = %call.id, "executing tool");
        entry.tool.execute(call.arguments.clone()).await
    }
}
