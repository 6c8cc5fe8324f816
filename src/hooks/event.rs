use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::engine::{Decision, ToolCall, Verdict};
use crate::error::EventError;
use crate::gates::GateId;

// ── Inbound events ────────────────────────────────────────────────

/// Raw host payload as it arrives on stdin. Everything is optional here;
/// [`HookEvent::parse`] decides what each event kind actually requires.
#[derive(Debug, Deserialize)]
struct RawEvent {
    hook_event_name: Option<String>,
    session_id: Option<String>,
    tool_name: Option<String>,
    #[serde(default)]
    tool_input: Value,
    prompt: Option<String>,
    agent_type: Option<String>,
}

/// A validated host lifecycle event.
#[derive(Debug)]
pub enum HookEvent {
    PreTool {
        session_id: String,
        call: ToolCall,
        subagent: bool,
    },
    PostTool {
        session_id: String,
        call: ToolCall,
    },
    UserPrompt {
        session_id: String,
        prompt: String,
    },
    SessionStart {
        session_id: String,
    },
}

impl HookEvent {
    /// Validate a raw host payload. Malformed or incomplete payloads are
    /// rejected outright; the adapter never guesses a session identity or
    /// a tool name.
    pub fn parse(raw: &str) -> Result<Self, EventError> {
        let raw: RawEvent =
            serde_json::from_str(raw).map_err(|e| EventError::Malformed(e.to_string()))?;

        let name = raw
            .hook_event_name
            .ok_or(EventError::MissingField("hook_event_name"))?;
        let session_id = raw
            .session_id
            .filter(|s| !s.is_empty())
            .ok_or(EventError::MissingField("session_id"))?;

        let tool_call = |tool_name: Option<String>, input: Value| {
            let name = tool_name
                .filter(|t| !t.is_empty())
                .ok_or(EventError::MissingField("tool_name"))?;
            Ok::<_, EventError>(ToolCall::new(name, input))
        };

        match name.as_str() {
            "PreToolUse" => Ok(Self::PreTool {
                session_id,
                subagent: raw.agent_type.as_deref().is_some_and(|a| !a.is_empty()),
                call: tool_call(raw.tool_name, raw.tool_input)?,
            }),
            "PostToolUse" => Ok(Self::PostTool {
                session_id,
                call: tool_call(raw.tool_name, raw.tool_input)?,
            }),
            "UserPromptSubmit" => Ok(Self::UserPrompt {
                session_id,
                prompt: raw.prompt.ok_or(EventError::MissingField("prompt"))?,
            }),
            "SessionStart" => Ok(Self::SessionStart { session_id }),
            other => Err(EventError::UnknownEvent(other.to_string())),
        }
    }

    pub fn session_id(&self) -> &str {
        match self {
            Self::PreTool { session_id, .. }
            | Self::PostTool { session_id, .. }
            | Self::UserPrompt { session_id, .. }
            | Self::SessionStart { session_id } => session_id,
        }
    }
}

// ── Outbound response ─────────────────────────────────────────────

/// Decision channel back to the host, printed as a single JSON object on
/// stdout. A deny travels here with exit code 0; non-zero exits are
/// reserved for engine faults.
#[derive(Debug, Serialize)]
pub struct HookResponse {
    pub decision: &'static str,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub gate: Option<GateId>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_path: Option<PathBuf>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub annotations: Vec<String>,
}

impl From<Verdict> for HookResponse {
    fn from(verdict: Verdict) -> Self {
        match verdict.decision {
            Decision::Allow => Self {
                decision: "allow",
                reason: None,
                gate: None,
                context_path: None,
                annotations: verdict.annotations,
            },
            Decision::Deny {
                gate,
                directive,
                context_path,
            } => Self {
                decision: "deny",
                reason: Some(directive),
                gate: Some(gate),
                context_path: Some(context_path),
                annotations: verdict.annotations,
            },
        }
    }
}
