use std::fs;
use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use chrono::Utc;
use tera::Tera;
use uuid::Uuid;

use crate::config::{ArtifactsConfig, Config};
use crate::error::RenderError;
use crate::gates::GateId;
use crate::state::SessionState;

// ── Instruction payload ───────────────────────────────────────────

/// Deny-response content: a short directive naming the exact remedial
/// action, plus the path of a freshly rendered context artifact.
#[derive(Debug, Clone)]
pub struct InstructionPayload {
    pub directive: String,
    pub context_path: PathBuf,
}

// ── Renderer ──────────────────────────────────────────────────────

/// Renders remedial instructions from embedded templates.
///
/// The context artifact is regenerated on every call. The relevant
/// context depends on the current turn and session state, which change
/// between blocks, so a cached artifact would be stale by construction.
pub struct InstructionRenderer {
    tera: Tera,
    artifact_dir: PathBuf,
    max_age: Duration,
}

impl InstructionRenderer {
    pub fn new(config: &ArtifactsConfig) -> Result<Self, RenderError> {
        let mut tera = Tera::default();
        tera.add_raw_templates(vec![
            (
                "hydration_directive",
                include_str!("../../templates/hydration_directive.tera"),
            ),
            (
                "hydration_context",
                include_str!("../../templates/hydration_context.tera"),
            ),
            (
                "audit_directive",
                include_str!("../../templates/audit_directive.tera"),
            ),
            (
                "audit_context",
                include_str!("../../templates/audit_context.tera"),
            ),
            (
                "task_binding_directive",
                include_str!("../../templates/task_binding_directive.tera"),
            ),
            (
                "task_binding_context",
                include_str!("../../templates/task_binding_context.tera"),
            ),
        ])
        .map_err(|e| RenderError::Template(e.to_string()))?;

        Ok(Self {
            tera,
            artifact_dir: config.resolved_dir(),
            max_age: Duration::from_secs(config.max_age_secs),
        })
    }

    /// Render the instruction payload for `gate` against the current state.
    pub fn render(
        &self,
        gate: GateId,
        state: &SessionState,
        config: &Config,
    ) -> Result<InstructionPayload, RenderError> {
        self.sweep_stale();

        let mut ctx = tera::Context::new();
        ctx.insert("session_id", &state.session_id);
        ctx.insert("turn_count", &state.turn_count);
        ctx.insert(
            "pending_turn",
            &state.pending_hydration_for_turn.unwrap_or(state.turn_count),
        );
        ctx.insert("hydrated", &state.hydrated);
        ctx.insert("tool_calls_since_audit", &state.tool_calls_since_audit);
        ctx.insert("audit_threshold", &config.gates.audit_threshold);
        ctx.insert("task_bound", state.task_bound.as_deref().unwrap_or("none"));
        ctx.insert("dispatch_tool", &config.remedial.dispatch_tool);
        ctx.insert("delegate_field", &config.remedial.delegate_field);
        ctx.insert("hydrator_agent", &config.remedial.hydrator_agent);
        ctx.insert("auditor_agent", &config.remedial.auditor_agent);
        ctx.insert("bind_tool", &config.remedial.bind_tool);
        ctx.insert("rendered_at", &Utc::now().to_rfc3339());

        let body = self
            .tera
            .render(&format!("{gate}_context"), &ctx)
            .map_err(|e| RenderError::Template(e.to_string()))?;

        fs::create_dir_all(&self.artifact_dir)?;
        let context_path = self
            .artifact_dir
            .join(format!("gate-{gate}-{}.md", Uuid::new_v4()));
        fs::write(&context_path, body)?;

        ctx.insert("context_path", &context_path.display().to_string());
        let directive = self
            .tera
            .render(&format!("{gate}_directive"), &ctx)
            .map_err(|e| RenderError::Template(e.to_string()))?;

        Ok(InstructionPayload {
            directive: directive.trim().to_string(),
            context_path,
        })
    }

    /// Best-effort removal of artifacts past their max age. Failures here
    /// never block a render.
    fn sweep_stale(&self) {
        let Ok(entries) = fs::read_dir(&self.artifact_dir) else {
            return;
        };
        let now = SystemTime::now();
        for entry in entries.flatten() {
            let stale = entry
                .metadata()
                .and_then(|m| m.modified())
                .ok()
                .and_then(|mtime| now.duration_since(mtime).ok())
                .is_some_and(|age| age >= self.max_age);
            if stale && let Err(e) = fs::remove_file(entry.path()) {
                tracing::debug!(path = %entry.path().display(), error = %e, "stale artifact sweep failed");
            }
        }
    }
}
