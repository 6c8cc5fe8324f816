pub mod store;

pub use store::{FileStateStore, StateLock};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::gates::GateId;

// ── Session key ───────────────────────────────────────────────────

/// Stable on-disk key for one host session.
///
/// Derived from the host's own session identifier, not the working
/// directory: remedial delegates may execute from a different cwd than the
/// parent session and must still find the same record.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey(String);

impl SessionKey {
    pub fn derive(session_id: &str) -> Self {
        let digest = Sha256::digest(session_id.as_bytes());
        Self(hex::encode(&digest[..6]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// ── Session state record ──────────────────────────────────────────

/// Per-session compliance bookkeeping, persisted as one JSON record.
///
/// Mutated only inside a single hook invocation while the exclusive state
/// lock is held.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionState {
    /// Host session identifier this record belongs to
    pub session_id: String,

    /// ISO timestamp of record creation
    pub started_at: String,

    /// Whether the mandatory context-loading step is satisfied for the
    /// current hydratable turn
    pub hydrated: bool,

    /// Set when a new user turn requires hydration before other tool use
    pub pending_hydration_for_turn: Option<u64>,

    /// Tool calls observed since the last audit dispatch; reset only by
    /// the audit gate's remedial action
    pub tool_calls_since_audit: u32,

    /// Task the session attached itself to; set only by the explicit bind
    /// call, never inferred
    pub task_bound: Option<String>,

    /// Gate whose remedial action the engine expects next. At most one
    /// gate is resolved at a time.
    pub awaiting_remedial: Option<GateId>,

    /// Total user turns observed
    pub turn_count: u64,

    /// Turn-advisory thresholds already announced (each fires once)
    pub advisories_emitted: Vec<u32>,
}

impl SessionState {
    pub fn new(session_id: &str) -> Self {
        Self {
            session_id: session_id.to_string(),
            started_at: Utc::now().to_rfc3339(),
            hydrated: false,
            pending_hydration_for_turn: None,
            tool_calls_since_audit: 0,
            task_bound: None,
            awaiting_remedial: None,
            turn_count: 0,
            advisories_emitted: Vec::new(),
        }
    }

    /// Mark the start of a new hydratable user turn.
    pub fn begin_turn(&mut self, requires_hydration: bool) -> u64 {
        self.turn_count += 1;
        if requires_hydration {
            self.hydrated = false;
            self.pending_hydration_for_turn = Some(self.turn_count);
        }
        self.turn_count
    }

    /// Turn-advisory thresholds crossed but not yet announced. Marks them
    /// as emitted.
    pub fn take_crossed_advisories(&mut self, thresholds: &[u32]) -> Vec<u32> {
        let mut crossed = Vec::new();
        for &threshold in thresholds {
            if self.turn_count >= u64::from(threshold)
                && !self.advisories_emitted.contains(&threshold)
            {
                self.advisories_emitted.push(threshold);
                crossed.push(threshold);
            }
        }
        crossed
    }
}
