//! Tool registry for the Stride run engine: tool definitions, argument
//! validation, execution policies and the built-in PowerShell tools.

pub mod builtin;
pub mod error;
pub mod registry;
pub mod schema;
pub mod script_store;
pub mod tool;

pub use builtin::{
    DocumentationSearchTool, QualityAnalysisTool, ScriptGenerationTool, SecurityAnalysisTool,
};
pub use error::{Result, ToolError};
pub use registry::{ToolRegistry, ToolRegistryBuilder};
pub use schema::{validate, SchemaViolation};
pub use script_store::{InMemoryScriptStore, ScriptStore};
pub use tool::{Tool, ToolKind, ToolPolicies, ToolPolicy};
