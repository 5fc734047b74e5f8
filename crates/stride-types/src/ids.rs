use uuid::Uuid;

pub const ASSISTANT_PREFIX: &str = "asst";
pub const THREAD_PREFIX: &str = "thread";
pub const MESSAGE_PREFIX: &str = "msg";
pub const RUN_PREFIX: &str = "run";
pub const STEP_PREFIX: &str = "step";

/// Generate a prefixed, time-ordered identifier (`msg_0190...`).
///
/// UUIDv7 keeps ids lexicographically sortable in creation order, which the
/// document backend relies on for message ordering.
pub fn new_id(prefix: &str) -> String {
    format!("{}_{}", prefix, Uuid::now_v7().simple())
}
