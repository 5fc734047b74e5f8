use stride_tools::{ToolPolicy, ToolRegistry};
use stride_types::{Assistant, ToolCall};

/// Where each requested call goes after a tool-calls completion
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallPlan {
    /// Answered by the engine with an error message, never executed
    pub rejected: Vec<(ToolCall, String)>,
    /// Executed server-side before the next model round
    pub auto: Vec<ToolCall>,
    /// Surfaced to the client through `requires_action`
    pub external: Vec<ToolCall>,
}

impl CallPlan {
    pub fn needs_client(&self) -> bool {
        !self.external.is_empty()
    }
}

/// Split the calls of one completion by tool policy. Calls to tools the
/// assistant was not given, or with arguments that fail the tool's schema,
/// are rejected up front.
pub fn plan(calls: Vec<ToolCall>, registry: &ToolRegistry, assistant: &Assistant) -> CallPlan {
    let mut plan = CallPlan::default();

    for call in calls {
        if !assistant.allows_tool(&call.tool_name) {
            let reason = format!("tool '{}' is not available to this assistant", call.tool_name);
            plan.rejected.push((call, reason));
            continue;
        }
        if let Err(e) = registry.validate_call(&call) {
            plan.rejected.push((call, e.to_string()));
            continue;
        }

        match registry.policy(&call.tool_name) {
            Some(ToolPolicy::AutoExecute) => plan.auto.push(call),
            Some(ToolPolicy::External) => plan.external.push(call),
            None => {
                let reason = format!("tool '{}' not found", call.tool_name);
                plan.rejected.push((call, reason));
            }
        }
    }

    plan
}
