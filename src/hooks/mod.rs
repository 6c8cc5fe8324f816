//! Host adapter: turns lifecycle event payloads into engine calls and
//! engine verdicts into JSON responses. No policy logic lives here.

pub mod event;

pub use event::{HookEvent, HookResponse};

use crate::config::Config;
use crate::engine::GateEngine;
use crate::error::Result;
use crate::state::SessionKey;

/// Handle one raw host event end to end.
pub fn handle(config: &Config, raw: &str) -> Result<HookResponse> {
    let event = HookEvent::parse(raw)?;
    let engine = GateEngine::new(config)?;
    let key = SessionKey::derive(event.session_id());

    let verdict = match &event {
        HookEvent::PreTool {
            session_id,
            call,
            subagent,
        } => engine.pre_tool(&key, session_id, call, *subagent)?,
        HookEvent::PostTool { session_id, call } => engine.post_tool(&key, session_id, call)?,
        HookEvent::UserPrompt { session_id, prompt } => {
            engine.user_prompt(&key, session_id, prompt)?
        }
        HookEvent::SessionStart { session_id } => engine.session_start(&key, session_id)?,
    };
    Ok(HookResponse::from(verdict))
}
