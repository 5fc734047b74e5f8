pub mod config;
pub mod requests;

pub use config::EngineConfig;
pub use requests::{CreateAssistant, CreateRun};
