use super::{EvalCtx, Gate, GateId, is_delegate_dispatch};
use crate::engine::ToolCall;
use crate::state::SessionState;

/// Audit gate: once enough tool calls have accumulated, the session must
/// dispatch the compliance-audit delegate before further tool use.
pub const GATE: Gate = Gate {
    id: GateId::Audit,
    is_active,
    matches_remedial,
    apply_remedial,
};

fn is_active(ctx: &EvalCtx<'_>) -> bool {
    ctx.state.tool_calls_since_audit >= ctx.config.gates.audit_threshold
}

fn matches_remedial(ctx: &EvalCtx<'_>) -> bool {
    is_delegate_dispatch(ctx, &ctx.config.remedial.auditor_agent)
}

fn apply_remedial(state: &mut SessionState, _call: &ToolCall) {
    state.tool_calls_since_audit = 0;
}
