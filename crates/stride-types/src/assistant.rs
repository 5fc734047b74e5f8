use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{new_id, ASSISTANT_PREFIX, THREAD_PREFIX};
use crate::tool::ToolSpec;
use crate::Metadata;

/// Named configuration (model, instructions, allowed tools) that processes runs.
///
/// Immutable after creation except for `metadata`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assistant {
    pub id: String,
    pub name: String,
    pub model: String,
    pub instructions: String,
    pub tools: Vec<ToolSpec>,
    #[serde(default)]
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
}

impl Assistant {
    pub fn new(
        name: impl Into<String>,
        model: impl Into<String>,
        instructions: impl Into<String>,
        tools: Vec<ToolSpec>,
    ) -> Self {
        Self {
            id: new_id(ASSISTANT_PREFIX),
            name: name.into(),
            model: model.into(),
            instructions: instructions.into(),
            tools,
            metadata: Metadata::new(),
            created_at: Utc::now(),
        }
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn allows_tool(&self, name: &str) -> bool {
        self.tools.iter().any(|t| t.name == name)
    }
}

/// Conversation container holding messages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Thread {
    pub id: String,
    #[serde(default)]
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
}

impl Thread {
    pub fn new(metadata: Metadata) -> Self {
        Self {
            id: new_id(THREAD_PREFIX),
            metadata,
            created_at: Utc::now(),
        }
    }
}
