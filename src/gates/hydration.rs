use super::{EvalCtx, Gate, GateId, is_delegate_dispatch};
use crate::engine::ToolCall;
use crate::state::SessionState;

/// Hydration gate: a hydratable user turn must load its working context
/// before any other tool use.
pub const GATE: Gate = Gate {
    id: GateId::Hydration,
    is_active,
    matches_remedial,
    apply_remedial,
};

fn is_active(ctx: &EvalCtx<'_>) -> bool {
    ctx.state.pending_hydration_for_turn.is_some() && !ctx.state.hydrated
}

fn matches_remedial(ctx: &EvalCtx<'_>) -> bool {
    is_delegate_dispatch(ctx, &ctx.config.remedial.hydrator_agent)
}

// Pre-emptive: flips `hydrated` when the delegate dispatch is observed,
// not when it completes, so the delegate's own tool calls are never
// blocked by the gate they are resolving.
fn apply_remedial(state: &mut SessionState, _call: &ToolCall) {
    state.hydrated = true;
    state.pending_hydration_for_turn = None;
}
