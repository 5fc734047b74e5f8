use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use stride_types::ToolSpec;

use crate::error::Result;

/// Every tool this binary knows about. Model-supplied names resolve through
/// here, so an unknown name never reaches dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ToolKind {
    ScriptGeneration,
    SecurityAnalysis,
    QualityAnalysis,
    DocumentationSearch,
}

impl ToolKind {
    pub const ALL: [ToolKind; 4] = [
        ToolKind::ScriptGeneration,
        ToolKind::SecurityAnalysis,
        ToolKind::QualityAnalysis,
        ToolKind::DocumentationSearch,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::ScriptGeneration => "script-generation",
            Self::SecurityAnalysis => "security-analysis",
            Self::QualityAnalysis => "quality-analysis",
            Self::DocumentationSearch => "documentation-search",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.name() == name)
    }
}

impl std::fmt::Display for ToolKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Whether the engine runs a tool itself or hands the call to the client
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolPolicy {
    AutoExecute,
    #[default]
    External,
}

/// Per-tool policy overrides keyed by tool name. Unlisted tools are external.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ToolPolicies(pub BTreeMap<String, ToolPolicy>);

impl ToolPolicies {
    pub fn auto_execute(names: &[ToolKind]) -> Self {
        Self(
            names
                .iter()
                .map(|k| (k.name().to_string(), ToolPolicy::AutoExecute))
                .collect(),
        )
    }

    pub fn policy_for(&self, kind: ToolKind) -> ToolPolicy {
        self.0.get(kind.name()).copied().unwrap_or_default()
    }
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn kind(&self) -> ToolKind;

    fn description(&self) -> &str;

    /// JSON Schema of the arguments object
    fn parameters(&self) -> Value;

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.kind().name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters(),
        }
    }

    /// Run with arguments that already passed schema validation
    async fn execute(&self, args: Value) -> Result<Value>;
}
