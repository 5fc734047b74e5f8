use serde::{Deserialize, Serialize};
use serde_json::Value;
use stride_types::ToolSpec;

/// Tool/Function definition (sent to the provider)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tool {
    #[serde(rename = "type")]
    pub tool_type: String, // Always "function"
    pub function: FunctionDefinition,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDefinition {
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// JSON Schema for parameters
    pub parameters: Value,
}

impl Tool {
    pub fn new(name: impl Into<String>, description: impl Into<String>, parameters: Value) -> Self {
        Self {
            tool_type: "function".to_string(),
            function: FunctionDefinition {
                name: name.into(),
                description: Some(description.into()),
                parameters,
            },
        }
    }
}

impl From<&ToolSpec> for Tool {
    fn from(spec: &ToolSpec) -> Self {
        Self::new(&spec.name, &spec.description, spec.parameters.clone())
    }
}

/// Tool call made by the model (in an assistant message)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,

    #[serde(rename = "type")]
    pub tool_type: String, // "function"

    pub function: FunctionCall,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    pub arguments: String, // JSON string
}

impl ToolCall {
    /// Arguments as a JSON value. Unparseable arguments are kept as a raw
    /// string so schema validation can report them back to the model.
    pub fn arguments_value(&self) -> Value {
        serde_json::from_str(&self.function.arguments)
            .unwrap_or_else(|_| Value::String(self.function.arguments.clone()))
    }
}

impl From<&stride_types::ToolCall> for ToolCall {
    fn from(call: &stride_types::ToolCall) -> Self {
        Self {
            id: call.id.clone(),
            tool_type: "function".to_string(),
            function: FunctionCall {
                name: call.tool_name.clone(),
                arguments: call.arguments.to_string(),
            },
        }
    }
}

impl From<ToolCall> for stride_types::ToolCall {
    fn from(call: ToolCall) -> Self {
        let arguments = call.arguments_value();
        stride_types::ToolCall::new(call.id, call.function.name, arguments)
    }
}

/// Tool choice parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolChoice {
    Auto,
    None,
    Required,
}
