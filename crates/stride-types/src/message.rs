use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{new_id, MESSAGE_PREFIX};
use crate::tool::ToolCall;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    Tool,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
        }
    }
}

/// One turn in a thread. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub thread_id: String,
    pub role: MessageRole,
    pub content: String,

    /// Set when role = tool
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,

    /// Set on assistant turns that requested tools
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,

    /// Run that produced this message, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,

    pub created_at: DateTime<Utc>,
}

impl Message {
    fn base(thread_id: &str, role: MessageRole, content: String) -> Self {
        Self {
            id: new_id(MESSAGE_PREFIX),
            thread_id: thread_id.to_string(),
            role,
            content,
            tool_call_id: None,
            tool_calls: None,
            run_id: None,
            created_at: Utc::now(),
        }
    }

    pub fn user(thread_id: &str, content: impl Into<String>) -> Self {
        Self::base(thread_id, MessageRole::User, content.into())
    }

    pub fn assistant(thread_id: &str, run_id: &str, content: impl Into<String>) -> Self {
        let mut msg = Self::base(thread_id, MessageRole::Assistant, content.into());
        msg.run_id = Some(run_id.to_string());
        msg
    }

    /// Assistant turn that asked for tools; content is usually empty
    pub fn assistant_tool_calls(thread_id: &str, run_id: &str, tool_calls: Vec<ToolCall>) -> Self {
        let mut msg = Self::base(thread_id, MessageRole::Assistant, String::new());
        msg.run_id = Some(run_id.to_string());
        msg.tool_calls = Some(tool_calls);
        msg
    }

    pub fn tool(
        thread_id: &str,
        run_id: &str,
        tool_call_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        let mut msg = Self::base(thread_id, MessageRole::Tool, content.into());
        msg.run_id = Some(run_id.to_string());
        msg.tool_call_id = Some(tool_call_id.into());
        msg
    }
}
