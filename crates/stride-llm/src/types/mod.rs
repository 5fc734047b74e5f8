pub mod message;
pub mod tool;

pub use message::ChatMessage;
pub use tool::{FunctionCall, FunctionDefinition, Tool, ToolCall, ToolChoice};
