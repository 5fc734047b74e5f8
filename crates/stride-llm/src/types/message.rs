use serde::{Deserialize, Serialize};
use stride_types::{Message, MessageRole};

use super::tool::ToolCall;

/// Chat message in provider wire shape
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum ChatMessage {
    /// System prompt (instructions)
    System { content: String },

    #[serde(rename = "user")]
    Human { content: String },

    #[serde(rename = "assistant")]
    AI {
        #[serde(skip_serializing_if = "Option::is_none")]
        content: Option<String>,

        #[serde(skip_serializing_if = "Option::is_none")]
        tool_calls: Option<Vec<ToolCall>>,
    },

    Tool {
        tool_call_id: String,
        content: String,
    },
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self::System {
            content: content.into(),
        }
    }

    pub fn human(content: impl Into<String>) -> Self {
        Self::Human {
            content: content.into(),
        }
    }

    pub fn ai(content: impl Into<String>) -> Self {
        Self::AI {
            content: Some(content.into()),
            tool_calls: None,
        }
    }

    pub fn ai_with_tools(tool_calls: Vec<ToolCall>) -> Self {
        Self::AI {
            content: None,
            tool_calls: Some(tool_calls),
        }
    }

    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self::Tool {
            tool_call_id: tool_call_id.into(),
            content: content.into(),
        }
    }

    pub fn role(&self) -> &str {
        match self {
            Self::System { .. } => "system",
            Self::Human { .. } => "user",
            Self::AI { .. } => "assistant",
            Self::Tool { .. } => "tool",
        }
    }
}

impl From<&Message> for ChatMessage {
    fn from(msg: &Message) -> Self {
        match msg.role {
            MessageRole::User => Self::human(msg.content.clone()),
            MessageRole::Assistant => match &msg.tool_calls {
                Some(calls) if !calls.is_empty() => Self::AI {
                    content: (!msg.content.is_empty()).then(|| msg.content.clone()),
                    tool_calls: Some(calls.iter().map(ToolCall::from).collect()),
                },
                _ => Self::ai(msg.content.clone()),
            },
            MessageRole::Tool => Self::tool_result(
                msg.tool_call_id.clone().unwrap_or_default(),
                msg.content.clone(),
            ),
        }
    }
}
