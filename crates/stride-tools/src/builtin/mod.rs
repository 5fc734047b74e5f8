//! The four PowerShell tools shipped with the engine.

pub mod docs;
pub mod generate;
pub mod quality;
pub mod security;

pub use docs::DocumentationSearchTool;
pub use generate::ScriptGenerationTool;
pub use quality::QualityAnalysisTool;
pub use security::SecurityAnalysisTool;
