use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Value};
use stride_llm::{ChatMessage, Completion, CompletionRequest, LLMGateway};

use crate::error::{Result, ToolError};
use crate::tool::{Tool, ToolKind};

const SYSTEM_PROMPT: &str = "You are a PowerShell expert. Write a single, complete \
PowerShell script for the user's task. Use [CmdletBinding()] and a param() block, \
handle errors with try/catch, and prefer built-in cmdlets over external tools. \
Reply with the script in one ```powershell fenced block followed by a short explanation.";

static FENCED_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```(?:powershell|ps1|pwsh)?[ \t]*\r?\n(.*?)```").unwrap());

/// First fenced code block, or the whole reply when the model skipped fences
pub fn extract_script(reply: &str) -> String {
    FENCED_BLOCK
        .captures(reply)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .unwrap_or(reply)
        .trim()
        .to_string()
}

/// Generates a script from a natural-language description with a nested
/// model call.
pub struct ScriptGenerationTool {
    gateway: Arc<dyn LLMGateway>,
    model: String,
}

impl ScriptGenerationTool {
    pub fn new(gateway: Arc<dyn LLMGateway>, model: impl Into<String>) -> Self {
        Self {
            gateway,
            model: model.into(),
        }
    }
}

#[async_trait]
impl Tool for ScriptGenerationTool {
    fn kind(&self) -> ToolKind {
        ToolKind::ScriptGeneration
    }

    fn description(&self) -> &str {
        "Generate a PowerShell script from a plain-language task description."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "description": {"type": "string", "minLength": 1, "description": "What the script should do"}
            },
            "required": ["description"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, args: Value) -> Result<Value> {
        let description = args
            .get("description")
            .and_then(Value::as_str)
            .ok_or_else(|| ToolError::invalid(self.kind().name(), "'description' is required"))?;

        let request = CompletionRequest::new(&self.model)
            .instructions(SYSTEM_PROMPT)
            .messages(vec![ChatMessage::human(description)]);

        match self.gateway.complete(request).await? {
            Completion::Message { content } => Ok(json!({
                "script": extract_script(&content),
                "explanation": content,
            })),
            Completion::ToolCalls { .. } => Err(ToolError::Execution(
                "model requested tools instead of writing a script".to_string(),
            )),
        }
    }
}
