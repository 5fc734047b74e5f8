//! Run orchestration for Stride: the run state machine, one background task
//! per run, tool-call routing and deadline enforcement.

pub mod builder;
pub mod engine;
pub mod error;
pub mod router;
pub mod types;

mod processor;
mod sweeper;

pub use builder::RunEngineBuilder;
pub use engine::RunEngine;
pub use error::{EngineError, Result};
pub use router::{plan, CallPlan};
pub use types::{CreateAssistant, CreateRun, EngineConfig};
