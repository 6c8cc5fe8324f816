mod audit;
mod hydration;
mod task_binding;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::Config;
use crate::engine::ToolCall;
use crate::state::SessionState;

// ── Gate identity ─────────────────────────────────────────────────

/// Named blocking policies, in fixed priority order (highest first).
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum GateId {
    Hydration,
    Audit,
    TaskBinding,
}

// ── Gate value objects ────────────────────────────────────────────

/// Everything a gate evaluation can see. Predicates are pure functions of
/// this snapshot; the engine owns all mutation.
pub struct EvalCtx<'a> {
    pub state: &'a SessionState,
    pub call: &'a ToolCall,
    pub config: &'a Config,
}

/// One blocking policy: an activity predicate, a matcher recognising the
/// call that satisfies it, and the side effect applied when that call is
/// observed. Static configuration, never persisted.
pub struct Gate {
    pub id: GateId,
    pub is_active: fn(&EvalCtx<'_>) -> bool,
    pub matches_remedial: fn(&EvalCtx<'_>) -> bool,
    pub apply_remedial: fn(&mut SessionState, &ToolCall),
}

/// Blocking gates in priority order. Only the first active gate is ever
/// surfaced per deny, so the agent resolves one gate per turn.
pub const GATES: [Gate; 3] = [hydration::GATE, audit::GATE, task_binding::GATE];

pub fn by_id(id: GateId) -> &'static Gate {
    GATES
        .iter()
        .find(|gate| gate.id == id)
        .expect("every GateId has a registered gate")
}

/// True when `call` dispatches the named delegate through the host's
/// dispatch tool.
pub(crate) fn is_delegate_dispatch(ctx: &EvalCtx<'_>, delegate: &str) -> bool {
    ctx.call.name == ctx.config.remedial.dispatch_tool
        && ctx
            .call
            .args
            .get(&ctx.config.remedial.delegate_field)
            .and_then(Value::as_str)
            == Some(delegate)
}
