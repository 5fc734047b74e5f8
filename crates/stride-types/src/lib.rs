pub mod assistant;
pub mod ids;
pub mod message;
pub mod run;
pub mod step;
pub mod tool;

pub use assistant::{Assistant, Thread};
pub use ids::new_id;
pub use message::{Message, MessageRole};
pub use run::{
    RequiredAction, Run, RunError, RunErrorCode, RunPatch, RunStatus, TransitionError,
};
pub use step::{RunStep, RunStepPatch, RunStepStatus, RunStepType, StepDetails, StepFrozen};
pub use tool::{ToolCall, ToolOutput, ToolSpec};

/// Free-form key/value pairs attached to assistants, threads and runs.
pub type Metadata = std::collections::BTreeMap<String, String>;
