use serde_json::Value;

use super::{EvalCtx, Gate, GateId};
use crate::config::ToolCategory;
use crate::engine::ToolCall;
use crate::state::SessionState;

/// Task-binding gate: mutating tool calls require the session to have
/// attached itself to a tracked task first. Binding is only ever the
/// explicit bind call, never inferred.
pub const GATE: Gate = Gate {
    id: GateId::TaskBinding,
    is_active,
    matches_remedial,
    apply_remedial,
};

fn is_active(ctx: &EvalCtx<'_>) -> bool {
    ctx.state.task_bound.is_none()
        && ctx.config.tool_category(&ctx.call.name) == ToolCategory::Mutating
}

fn matches_remedial(ctx: &EvalCtx<'_>) -> bool {
    ctx.call.name == ctx.config.remedial.bind_tool && bound_task_id(&ctx.call.args).is_some()
}

fn apply_remedial(state: &mut SessionState, call: &ToolCall) {
    if let Some(task_id) = bound_task_id(&call.args) {
        state.task_bound = Some(task_id);
    }
}

fn bound_task_id(args: &Value) -> Option<String> {
    args.get("task_id")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(String::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn ctx<'a>(state: &'a SessionState, call: &'a ToolCall, config: &'a Config) -> EvalCtx<'a> {
        EvalCtx { state, call, config }
    }

    #[test]
    fn active_only_for_mutating_calls_without_binding() {
        let config = Config::default();
        let state = SessionState::new("s1");

        let write = ToolCall::new("Write", serde_json::json!({"path": "a.rs"}));
        assert!(is_active(&ctx(&state, &write, &config)));

        let read = ToolCall::new("Read", serde_json::json!({"path": "a.rs"}));
        assert!(!is_active(&ctx(&state, &read, &config)));

        let dispatch = ToolCall::new("Task", serde_json::json!({}));
        assert!(!is_active(&ctx(&state, &dispatch, &config)));
    }

    #[test]
    fn inactive_once_bound() {
        let config = Config::default();
        let mut state = SessionState::new("s1");
        state.task_bound = Some("T-1".into());
        let write = ToolCall::new("Write", serde_json::json!({}));
        assert!(!is_active(&ctx(&state, &write, &config)));
    }

    #[test]
    fn remedial_requires_task_id() {
        let config = Config::default();
        let state = SessionState::new("s1");

        let bind = ToolCall::new("task_bind", serde_json::json!({"task_id": "T-42"}));
        assert!(matches_remedial(&ctx(&state, &bind, &config)));

        let empty = ToolCall::new("task_bind", serde_json::json!({"task_id": "  "}));
        assert!(!matches_remedial(&ctx(&state, &empty, &config)));

        let missing = ToolCall::new("task_bind", serde_json::json!({}));
        assert!(!matches_remedial(&ctx(&state, &missing, &config)));
    }

    #[test]
    fn apply_binds_the_named_task() {
        let mut state = SessionState::new("s1");
        let bind = ToolCall::new("task_bind", serde_json::json!({"task_id": "T-42"}));
        apply_remedial(&mut state, &bind);
        assert_eq!(state.task_bound.as_deref(), Some("T-42"));
    }
}
