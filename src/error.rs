use std::path::PathBuf;

use thiserror::Error;

// ─── Top-level error hierarchy ───────────────────────────────────────────────

/// Structured error hierarchy for `toolgate`.
///
/// Every variant is a fatal engine condition: a policy deny is *not* an
/// error and travels through the normal verdict channel. The hook adapter
/// maps any of these to a non-zero exit code so the host halts the tool
/// call instead of proceeding with unknown policy state.
#[derive(Debug, Error)]
pub enum GateError {
    // ── Config ───────────────────────────────────────────────────────────
    #[error("config: {0}")]
    Config(#[from] ConfigError),

    // ── Session state store ─────────────────────────────────────────────
    #[error("state: {0}")]
    State(#[from] StateError),

    // ── Host event payload ──────────────────────────────────────────────
    #[error("event: {0}")]
    Event(#[from] EventError),

    // ── Instruction rendering ───────────────────────────────────────────
    #[error("render: {0}")]
    Render(#[from] RenderError),

    // ── Generic fallthrough (wraps anyhow for interop) ──────────────────
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

// ─── Config errors ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load config: {0}")]
    Load(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

// ─── Session state store errors ─────────────────────────────────────────────

/// Failures of the session state store.
///
/// A corrupt or unreadable record never degrades into a fresh default:
/// silently resetting compliance counters would mask exactly the violations
/// the engine exists to catch.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("state record not found for session key {key}")]
    NotFound { key: String },

    #[error("corrupt state record at {}: {reason}", path.display())]
    Corrupt { path: PathBuf, reason: String },

    #[error("state lock at {} not acquired within {waited_ms}ms", path.display())]
    LockTimeout { path: PathBuf, waited_ms: u64 },

    #[error("state store unavailable: {0}")]
    Unavailable(String),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

// ─── Host event errors ──────────────────────────────────────────────────────

/// Malformed host payloads are fatal: the adapter never guesses a tool
/// identity or session key.
#[derive(Debug, Error)]
pub enum EventError {
    #[error("event payload is not valid JSON: {0}")]
    Malformed(String),

    #[error("event payload missing required field `{0}`")]
    MissingField(&'static str),

    #[error("unknown hook event `{0}`")]
    UnknownEvent(String),
}

// ─── Instruction renderer errors ────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("template render failed: {0}")]
    Template(String),

    #[error("context artifact write failed: {0}")]
    Artifact(#[from] std::io::Error),
}

// ─── Convenience re-exports ─────────────────────────────────────────────────

/// Shorthand result type for the crate.
pub type Result<T> = std::result::Result<T, GateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_corrupt_displays_path_and_reason() {
        let err = GateError::State(StateError::Corrupt {
            path: PathBuf::from("/tmp/session-abc.json"),
            reason: "trailing garbage".into(),
        });
        assert!(err.to_string().contains("session-abc.json"));
        assert!(err.to_string().contains("trailing garbage"));
    }

    #[test]
    fn lock_timeout_displays_wait() {
        let err = StateError::LockTimeout {
            path: PathBuf::from("/tmp/session-abc.lock"),
            waited_ms: 3000,
        };
        assert!(err.to_string().contains("3000ms"));
    }

    #[test]
    fn missing_field_names_the_field() {
        let err = GateError::Event(EventError::MissingField("tool_name"));
        assert!(err.to_string().contains("tool_name"));
    }

    #[test]
    fn anyhow_interop() {
        let anyhow_err = anyhow::anyhow!("something went wrong");
        let gate_err: GateError = anyhow_err.into();
        assert!(gate_err.to_string().contains("something went wrong"));
    }
}
