use std::path::PathBuf;

use rand::Rng;
use serde_json::Value;

use crate::config::{Config, GateMode, ToolCategory};
use crate::error::Result;
use crate::gates::{self, EvalCtx, GateId};
use crate::render::{InstructionPayload, InstructionRenderer};
use crate::state::{FileStateStore, SessionKey, SessionState};

// ── Internal call representation ──────────────────────────────────

/// A tool invocation as the engine sees it: a name and an opaque argument
/// object. The engine never interprets tool semantics beyond matching
/// names and argument shapes.
#[derive(Debug, Clone)]
pub struct ToolCall {
    pub name: String,
    pub args: Value,
}

impl ToolCall {
    pub fn new(name: impl Into<String>, args: Value) -> Self {
        Self {
            name: name.into(),
            args,
        }
    }
}

// ── Verdicts ──────────────────────────────────────────────────────

/// Policy outcome for one pre-tool evaluation. A deny is normal control
/// flow, never an error.
#[derive(Debug, Clone)]
pub enum Decision {
    Allow,
    Deny {
        gate: GateId,
        directive: String,
        context_path: PathBuf,
    },
}

#[derive(Debug, Clone)]
pub struct Verdict {
    pub decision: Decision,
    pub annotations: Vec<String>,
}

impl Verdict {
    pub fn allow() -> Self {
        Self {
            decision: Decision::Allow,
            annotations: Vec::new(),
        }
    }

    pub fn allow_with(annotations: Vec<String>) -> Self {
        Self {
            decision: Decision::Allow,
            annotations,
        }
    }

    fn deny(gate: GateId, payload: InstructionPayload, annotations: Vec<String>) -> Self {
        Self {
            decision: Decision::Deny {
                gate,
                directive: payload.directive,
                context_path: payload.context_path,
            },
            annotations,
        }
    }

    pub fn is_allow(&self) -> bool {
        matches!(self.decision, Decision::Allow)
    }
}

// ── Engine ────────────────────────────────────────────────────────

/// Orchestrates the gates against persisted session state.
///
/// Every entry point spans its whole load → evaluate → persist sequence
/// under the exclusive session lock, so a verdict is always computed
/// against a snapshot no concurrent hook invocation is mutating.
pub struct GateEngine<'a> {
    config: &'a Config,
    store: FileStateStore,
    renderer: InstructionRenderer,
}

impl<'a> GateEngine<'a> {
    pub fn new(config: &'a Config) -> Result<Self> {
        Ok(Self {
            config,
            store: FileStateStore::new(&config.state),
            renderer: InstructionRenderer::new(&config.artifacts)?,
        })
    }

    pub fn with_store(
        config: &'a Config,
        store: FileStateStore,
        renderer: InstructionRenderer,
    ) -> Self {
        Self {
            config,
            store,
            renderer,
        }
    }

    /// Pre-tool-call evaluation.
    ///
    /// The remedial-recognition step runs *before* the deny policy: the
    /// call that resolves a gate must not be blocked by the very gate it
    /// resolves, so its side effect is applied pre-emptively, at dispatch
    /// rather than at completion.
    pub fn pre_tool(
        &self,
        key: &SessionKey,
        session_id: &str,
        call: &ToolCall,
        subagent: bool,
    ) -> Result<Verdict> {
        if subagent {
            // A delegate resolving a gate runs inside its own host session;
            // re-gating it would deadlock the resolution it exists for.
            return Ok(Verdict::allow());
        }

        let _lock = self.store.lock(key)?;
        let mut state = self.store.load(key, session_id)?;

        // Step 2: a deny was issued and this call is its remedial action.
        if let Some(gate_id) = state.awaiting_remedial {
            let gate = gates::by_id(gate_id);
            let matched = {
                let ctx = EvalCtx {
                    state: &state,
                    call,
                    config: self.config,
                };
                (gate.matches_remedial)(&ctx)
            };
            if matched {
                (gate.apply_remedial)(&mut state, call);
                state.awaiting_remedial = None;
                self.store.save(key, &state)?;
                tracing::info!(gate = %gate_id, tool = %call.name, "remedial action observed, gate cleared");
                return Ok(Verdict::allow());
            }
        }

        // Step 3: highest-priority active gate wins; one gate per deny.
        let mut annotations = Vec::new();
        let mut dirty = false;
        for gate in &gates::GATES {
            let (active, matches) = {
                let ctx = EvalCtx {
                    state: &state,
                    call,
                    config: self.config,
                };
                ((gate.is_active)(&ctx), (gate.matches_remedial)(&ctx))
            };
            if !active {
                continue;
            }
            if matches {
                // Voluntary compliance: the call is the gate's own remedial
                // action even though no deny was issued yet.
                (gate.apply_remedial)(&mut state, call);
                dirty = true;
                continue;
            }
            match self.mode_for(gate.id) {
                GateMode::Block => {
                    state.awaiting_remedial = Some(gate.id);
                    self.store.save(key, &state)?;
                    let payload = self.renderer.render(gate.id, &state, self.config)?;
                    tracing::info!(gate = %gate.id, tool = %call.name, "tool call denied");
                    return Ok(Verdict::deny(gate.id, payload, annotations));
                }
                GateMode::Warn => {
                    let payload = self.renderer.render(gate.id, &state, self.config)?;
                    annotations.push(format!("[{} gate, warn mode] {}", gate.id, payload.directive));
                }
            }
        }

        if dirty {
            self.store.save(key, &state)?;
        }
        Ok(Verdict::allow_with(annotations))
    }

    /// Post-tool-call bookkeeping. Only counters and advisory annotations;
    /// denial is a pre-tool-call-only concept.
    pub fn post_tool(&self, key: &SessionKey, session_id: &str, call: &ToolCall) -> Result<Verdict> {
        let _lock = self.store.lock(key)?;
        let mut state = self.store.load(key, session_id)?;

        let counted = self.config.tool_category(&call.name) != ToolCategory::ReadOnly;
        if counted {
            state.tool_calls_since_audit += 1;
            self.store.save(key, &state)?;
        }

        let mut annotations = Vec::new();
        if state.tool_calls_since_audit < self.config.gates.audit_threshold
            && let Some(reminder) = self.sample_reminder()
        {
            annotations.push(reminder);
        }
        Ok(Verdict::allow_with(annotations))
    }

    /// New user turn: bump the turn counter, mark the turn hydratable
    /// unless the prompt carries a bypass prefix, and surface any crossed
    /// turn-count advisories.
    pub fn user_prompt(&self, key: &SessionKey, session_id: &str, prompt: &str) -> Result<Verdict> {
        let _lock = self.store.lock(key)?;
        let mut state = self.store.load(key, session_id)?;

        let bypass = prompt.trim_start().starts_with(['/', '.']);
        state.begin_turn(!bypass);

        let mut annotations = Vec::new();
        for threshold in
            state.take_crossed_advisories(&self.config.gates.turn_advisory_thresholds)
        {
            annotations.push(format!(
                "session has reached {threshold} turns; consider wrapping up or handing over"
            ));
        }
        self.store.save(key, &state)?;
        Ok(Verdict::allow_with(annotations))
    }

    /// Session start: create the record and mark the first turn hydratable
    /// (hosts do not fire a user-prompt event for the opening prompt).
    pub fn session_start(&self, key: &SessionKey, session_id: &str) -> Result<Verdict> {
        let _lock = self.store.lock(key)?;
        let mut state = self.store.load(key, session_id)?;
        if state.turn_count == 0 {
            state.begin_turn(true);
        }
        self.store.save(key, &state)?;
        Ok(Verdict::allow())
    }

    /// Read-only view of a session's record, for the `state` CLI command.
    pub fn inspect(&self, key: &SessionKey) -> Result<SessionState> {
        Ok(self.store.load_existing(key)?)
    }

    fn mode_for(&self, gate: GateId) -> GateMode {
        match gate {
            GateId::Hydration => self.config.gates.hydration_mode,
            GateId::Audit => self.config.gates.audit_mode,
            GateId::TaskBinding => self.config.gates.task_mode,
        }
    }

    fn sample_reminder(&self) -> Option<String> {
        let mut rng = rand::rng();
        if rng.random::<f64>() >= self.config.reminders.probability {
            return None;
        }
        let pool = self.config.reminders.pool();
        if pool.is_empty() {
            return None;
        }
        let pick = rng.random_range(0..pool.len());
        Some(pool[pick].clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    struct Harness {
        config: Config,
        _state_dir: tempfile::TempDir,
        _artifact_dir: tempfile::TempDir,
        state_root: PathBuf,
    }

    impl Harness {
        fn new() -> Self {
            let state_dir = tempfile::tempdir().unwrap();
            let artifact_dir = tempfile::tempdir().unwrap();
            let mut config = Config::default();
            config.gates.task_mode = GateMode::Block;
            config.reminders.probability = 0.0;
            config.artifacts.dir = Some(artifact_dir.path().to_path_buf());
            let state_root = state_dir.path().to_path_buf();
            Self {
                config,
                _state_dir: state_dir,
                _artifact_dir: artifact_dir,
                state_root,
            }
        }

        fn engine(&self) -> GateEngine<'_> {
            let store = FileStateStore::with_root(&self.state_root, Duration::from_millis(500));
            let renderer = InstructionRenderer::new(&self.config.artifacts).unwrap();
            GateEngine::with_store(&self.config, store, renderer)
        }

        fn store(&self) -> FileStateStore {
            FileStateStore::with_root(&self.state_root, Duration::from_millis(500))
        }

        fn seed(&self, key: &SessionKey, state: &SessionState) {
            self.store().save(key, state).unwrap();
        }
    }

    fn hydrator_dispatch() -> ToolCall {
        ToolCall::new(
            "Task",
            serde_json::json!({"subagent_type": "prompt-hydrator", "prompt": "hydrate"}),
        )
    }

    fn auditor_dispatch() -> ToolCall {
        ToolCall::new("Task", serde_json::json!({"subagent_type": "compliance-auditor"}))
    }

    fn bind_call() -> ToolCall {
        ToolCall::new("task_bind", serde_json::json!({"task_id": "T-1"}))
    }

    #[test]
    fn remedial_action_is_never_blocked_by_its_own_gate() {
        // For every gate: active + awaiting ⇒ its remedial call is allowed,
        // awaiting is cleared and the side effect is applied.
        let cases = [
            (GateId::Hydration, hydrator_dispatch()),
            (GateId::Audit, auditor_dispatch()),
            (GateId::TaskBinding, bind_call()),
        ];
        for (gate, remedial) in cases {
            let harness = Harness::new();
            let key = SessionKey::derive("s1");
            let mut state = SessionState::new("s1");
            state.begin_turn(true);
            state.tool_calls_since_audit = 20;
            state.awaiting_remedial = Some(gate);
            harness.seed(&key, &state);

            let verdict = harness
                .engine()
                .pre_tool(&key, "s1", &remedial, false)
                .unwrap();
            assert!(verdict.is_allow(), "{gate} remedial was blocked");

            let after = harness.store().load_existing(&key).unwrap();
            assert_eq!(after.awaiting_remedial, None, "{gate} still awaiting");
            match gate {
                GateId::Hydration => assert!(after.hydrated),
                GateId::Audit => assert_eq!(after.tool_calls_since_audit, 0),
                GateId::TaskBinding => assert_eq!(after.task_bound.as_deref(), Some("T-1")),
            }
        }
    }

    #[test]
    fn highest_priority_gate_wins_when_several_are_active() {
        let harness = Harness::new();
        let key = SessionKey::derive("s1");
        let mut state = SessionState::new("s1");
        state.begin_turn(true); // hydration active
        state.tool_calls_since_audit = 20; // audit active
        harness.seed(&key, &state); // task unbound: task gate active too

        let call = ToolCall::new("Write", serde_json::json!({"path": "a.rs"}));
        let verdict = harness.engine().pre_tool(&key, "s1", &call, false).unwrap();
        match verdict.decision {
            Decision::Deny { gate, .. } => assert_eq!(gate, GateId::Hydration),
            Decision::Allow => panic!("expected deny"),
        }
        let after = harness.store().load_existing(&key).unwrap();
        assert_eq!(after.awaiting_remedial, Some(GateId::Hydration));
    }

    #[test]
    fn unrelated_call_while_blocked_stays_blocked() {
        let harness = Harness::new();
        let key = SessionKey::derive("s1");
        let mut state = SessionState::new("s1");
        state.begin_turn(true);
        state.awaiting_remedial = Some(GateId::Hydration);
        harness.seed(&key, &state);

        let call = ToolCall::new("Grep", serde_json::json!({"pattern": "x"}));
        let verdict = harness.engine().pre_tool(&key, "s1", &call, false).unwrap();
        assert!(!verdict.is_allow());
        let after = harness.store().load_existing(&key).unwrap();
        assert_eq!(after.awaiting_remedial, Some(GateId::Hydration));
    }

    #[test]
    fn deny_carries_directive_and_fresh_artifact() {
        let harness = Harness::new();
        let key = SessionKey::derive("s1");
        let mut state = SessionState::new("s1");
        state.begin_turn(true);
        harness.seed(&key, &state);

        let call = ToolCall::new("Read", serde_json::json!({"path": "a.rs"}));
        let verdict = harness.engine().pre_tool(&key, "s1", &call, false).unwrap();
        match verdict.decision {
            Decision::Deny {
                directive,
                context_path,
                ..
            } => {
                assert!(directive.contains("prompt-hydrator"));
                assert!(context_path.is_file());
            }
            Decision::Allow => panic!("expected deny"),
        }
    }

    #[test]
    fn voluntary_compliance_resolves_without_prior_deny() {
        let harness = Harness::new();
        let key = SessionKey::derive("s1");
        let mut state = SessionState::new("s1");
        state.begin_turn(true);
        harness.seed(&key, &state);

        let verdict = harness
            .engine()
            .pre_tool(&key, "s1", &hydrator_dispatch(), false)
            .unwrap();
        assert!(verdict.is_allow());
        let after = harness.store().load_existing(&key).unwrap();
        assert!(after.hydrated);
        assert_eq!(after.awaiting_remedial, None);
    }

    #[test]
    fn warn_mode_allows_with_annotation() {
        let mut harness = Harness::new();
        harness.config.gates.task_mode = GateMode::Warn;
        let key = SessionKey::derive("s1");
        harness.seed(&key, &SessionState::new("s1"));

        let call = ToolCall::new("Write", serde_json::json!({"path": "a.rs"}));
        let verdict = harness.engine().pre_tool(&key, "s1", &call, false).unwrap();
        assert!(verdict.is_allow());
        assert_eq!(verdict.annotations.len(), 1);
        assert!(verdict.annotations[0].contains("task_binding"));
        // Warn mode never arms the remedial expectation.
        let after = harness.store().load_existing(&key).unwrap();
        assert_eq!(after.awaiting_remedial, None);
    }

    #[test]
    fn subagent_invocations_bypass_blocking_gates() {
        let harness = Harness::new();
        let key = SessionKey::derive("s1");
        let mut state = SessionState::new("s1");
        state.begin_turn(true);
        harness.seed(&key, &state);

        let call = ToolCall::new("Write", serde_json::json!({"path": "a.rs"}));
        let verdict = harness.engine().pre_tool(&key, "s1", &call, true).unwrap();
        assert!(verdict.is_allow());
    }

    #[test]
    fn post_tool_counts_everything_but_read_only() {
        let harness = Harness::new();
        let key = SessionKey::derive("s1");
        harness.seed(&key, &SessionState::new("s1"));
        let engine = harness.engine();

        engine
            .post_tool(&key, "s1", &ToolCall::new("Read", serde_json::json!({})))
            .unwrap();
        assert_eq!(
            harness.store().load_existing(&key).unwrap().tool_calls_since_audit,
            0
        );

        engine
            .post_tool(&key, "s1", &ToolCall::new("Write", serde_json::json!({})))
            .unwrap();
        engine
            .post_tool(&key, "s1", &ToolCall::new("Task", serde_json::json!({})))
            .unwrap();
        assert_eq!(
            harness.store().load_existing(&key).unwrap().tool_calls_since_audit,
            2
        );
    }

    #[test]
    fn post_tool_never_denies_even_past_threshold() {
        let harness = Harness::new();
        let key = SessionKey::derive("s1");
        let mut state = SessionState::new("s1");
        state.tool_calls_since_audit = 50;
        harness.seed(&key, &state);

        let verdict = harness
            .engine()
            .post_tool(&key, "s1", &ToolCall::new("Write", serde_json::json!({})))
            .unwrap();
        assert!(verdict.is_allow());
    }

    #[test]
    fn reminders_sampled_on_non_threshold_calls() {
        let mut harness = Harness::new();
        harness.config.reminders.probability = 1.0;
        let key = SessionKey::derive("s1");
        harness.seed(&key, &SessionState::new("s1"));

        let verdict = harness
            .engine()
            .post_tool(&key, "s1", &ToolCall::new("Write", serde_json::json!({})))
            .unwrap();
        assert_eq!(verdict.annotations.len(), 1);
    }

    #[test]
    fn user_prompt_marks_turn_hydratable_unless_bypassed() {
        let harness = Harness::new();
        let key = SessionKey::derive("s1");
        let engine = harness.engine();

        engine.user_prompt(&key, "s1", "fix the parser").unwrap();
        let state = harness.store().load_existing(&key).unwrap();
        assert_eq!(state.pending_hydration_for_turn, Some(1));

        engine.user_prompt(&key, "s1", "/status").unwrap();
        let state = harness.store().load_existing(&key).unwrap();
        assert_eq!(state.turn_count, 2);
        assert_eq!(state.pending_hydration_for_turn, None);
    }

    #[test]
    fn turn_advisories_fire_once() {
        let harness = Harness::new();
        let key = SessionKey::derive("s1");
        let mut state = SessionState::new("s1");
        state.turn_count = 19;
        harness.seed(&key, &state);
        let engine = harness.engine();

        let verdict = engine.user_prompt(&key, "s1", "keep going").unwrap();
        assert_eq!(verdict.annotations.len(), 1);
        assert!(verdict.annotations[0].contains("20 turns"));

        let verdict = engine.user_prompt(&key, "s1", "and again").unwrap();
        assert!(verdict.annotations.is_empty());
    }

    #[test]
    fn session_start_marks_first_turn_hydratable() {
        let harness = Harness::new();
        let key = SessionKey::derive("s1");
        harness.engine().session_start(&key, "s1").unwrap();

        let state = harness.store().load_existing(&key).unwrap();
        assert_eq!(state.turn_count, 1);
        assert_eq!(state.pending_hydration_for_turn, Some(1));
    }

    #[test]
    fn corrupt_state_is_fatal_not_allow() {
        let harness = Harness::new();
        let key = SessionKey::derive("s1");
        std::fs::write(
            harness.state_root.join(format!("session-{key}.json")),
            "not json at all",
        )
        .unwrap();

        let call = ToolCall::new("Read", serde_json::json!({}));
        let err = harness
            .engine()
            .pre_tool(&key, "s1", &call, false)
            .unwrap_err();
        assert!(err.to_string().contains("corrupt state record"));
    }
}
