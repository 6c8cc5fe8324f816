use std::fs;
use std::path::{Path, PathBuf};

use directories::BaseDirs;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

// ── Top-level config ──────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Path to toolgate.toml - computed at load time, not serialized
    #[serde(skip)]
    pub config_path: Option<PathBuf>,

    #[serde(default)]
    pub gates: GatesConfig,

    #[serde(default)]
    pub remedial: RemedialConfig,

    #[serde(default)]
    pub tools: ToolsConfig,

    #[serde(default)]
    pub state: StateConfig,

    #[serde(default)]
    pub reminders: RemindersConfig,

    #[serde(default)]
    pub artifacts: ArtifactsConfig,
}

impl Config {
    /// Load config from `$TOOLGATE_CONFIG`, then the user config directory,
    /// falling back to built-in defaults when no file exists.
    pub fn load_or_default() -> Result<Self, ConfigError> {
        let candidates = config_candidates();
        for path in candidates {
            if path.is_file() {
                let mut config = Self::load_from(&path)?;
                config.config_path = Some(path);
                config.validate()?;
                return Ok(config);
            }
        }
        let config = Self::default();
        config.validate()?;
        Ok(config)
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path)?;
        toml::from_str(&raw)
            .map_err(|e| ConfigError::Load(format!("{}: {e}", path.display())))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.gates.audit_threshold == 0 {
            return Err(ConfigError::Validation(
                "gates.audit_threshold must be at least 1".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.reminders.probability) {
            return Err(ConfigError::Validation(format!(
                "reminders.probability must be within [0.0, 1.0], got {}",
                self.reminders.probability
            )));
        }
        if self.state.lock_timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "state.lock_timeout_ms must be non-zero".into(),
            ));
        }
        Ok(())
    }

    /// Category of a tool by name. Unknown tools are treated as mutating so
    /// an uncategorised tool never slips past the task-binding gate.
    pub fn tool_category(&self, tool_name: &str) -> ToolCategory {
        if self.tools.read_only.iter().any(|t| t == tool_name) {
            ToolCategory::ReadOnly
        } else if self.tools.meta.iter().any(|t| t == tool_name) {
            ToolCategory::Meta
        } else {
            ToolCategory::Mutating
        }
    }
}

fn config_candidates() -> Vec<PathBuf> {
    let mut candidates = Vec::new();
    if let Ok(path) = std::env::var("TOOLGATE_CONFIG") {
        candidates.push(PathBuf::from(path));
    }
    if let Some(dirs) = BaseDirs::new() {
        candidates.push(dirs.config_dir().join("toolgate").join("toolgate.toml"));
    }
    candidates
}

// ── Gate behaviour ────────────────────────────────────────────────

/// Enforcement mode for a blocking gate. `warn` renders the instruction as
/// an annotation on an `allow` verdict instead of denying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum GateMode {
    #[default]
    Block,
    Warn,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatesConfig {
    /// Tool calls counted toward the next mandatory audit (default: 7)
    #[serde(default = "default_audit_threshold")]
    pub audit_threshold: u32,

    #[serde(default)]
    pub hydration_mode: GateMode,

    #[serde(default)]
    pub audit_mode: GateMode,

    #[serde(default = "default_task_mode")]
    pub task_mode: GateMode,

    /// Turn counts at which a one-shot advisory annotation is emitted
    #[serde(default = "default_turn_advisories")]
    pub turn_advisory_thresholds: Vec<u32>,
}

fn default_audit_threshold() -> u32 {
    7
}

fn default_task_mode() -> GateMode {
    GateMode::Warn
}

fn default_turn_advisories() -> Vec<u32> {
    vec![20, 30]
}

impl Default for GatesConfig {
    fn default() -> Self {
        Self {
            audit_threshold: default_audit_threshold(),
            hydration_mode: GateMode::Block,
            audit_mode: GateMode::Block,
            task_mode: default_task_mode(),
            turn_advisory_thresholds: default_turn_advisories(),
        }
    }
}

// ── Remedial action shapes ────────────────────────────────────────

/// Names the exact tool calls that satisfy each gate. Delegates are plain
/// tool calls from the host's perspective, distinguishable only by name and
/// argument shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemedialConfig {
    /// Host tool that dispatches a delegate task (default: "Task")
    #[serde(default = "default_dispatch_tool")]
    pub dispatch_tool: String,

    /// Argument key carrying the delegate name (default: "subagent_type")
    #[serde(default = "default_delegate_field")]
    pub delegate_field: String,

    /// Delegate resolving the hydration gate
    #[serde(default = "default_hydrator_agent")]
    pub hydrator_agent: String,

    /// Delegate resolving the audit gate
    #[serde(default = "default_auditor_agent")]
    pub auditor_agent: String,

    /// Explicit state-mutating call that binds a task to the session
    #[serde(default = "default_bind_tool")]
    pub bind_tool: String,
}

fn default_dispatch_tool() -> String {
    "Task".into()
}

fn default_delegate_field() -> String {
    "subagent_type".into()
}

fn default_hydrator_agent() -> String {
    "prompt-hydrator".into()
}

fn default_auditor_agent() -> String {
    "compliance-auditor".into()
}

fn default_bind_tool() -> String {
    "task_bind".into()
}

impl Default for RemedialConfig {
    fn default() -> Self {
        Self {
            dispatch_tool: default_dispatch_tool(),
            delegate_field: default_delegate_field(),
            hydrator_agent: default_hydrator_agent(),
            auditor_agent: default_auditor_agent(),
            bind_tool: default_bind_tool(),
        }
    }
}

// ── Tool categorisation ───────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolCategory {
    /// No side effects; never counted, never task-gated
    ReadOnly,
    /// Modifies files or external state; task-gated and counted
    Mutating,
    /// Affects agent behaviour only (dispatch, planning); counted, not task-gated
    Meta,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    #[serde(default = "default_read_only_tools")]
    pub read_only: Vec<String>,

    #[serde(default = "default_meta_tools")]
    pub meta: Vec<String>,
}

fn default_read_only_tools() -> Vec<String> {
    ["Read", "Glob", "Grep", "WebFetch", "WebSearch", "TaskOutput"]
        .map(String::from)
        .to_vec()
}

fn default_meta_tools() -> Vec<String> {
    ["Task", "TodoWrite", "AskUserQuestion", "EnterPlanMode", "ExitPlanMode"]
        .map(String::from)
        .to_vec()
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            read_only: default_read_only_tools(),
            meta: default_meta_tools(),
        }
    }
}

// ── State store ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateConfig {
    /// Primary state root; overrides the user data directory when set
    #[serde(default)]
    pub root: Option<PathBuf>,

    /// Bounded wait for the exclusive state lock (default: 3000ms)
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,
}

fn default_lock_timeout_ms() -> u64 {
    3000
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            root: None,
            lock_timeout_ms: default_lock_timeout_ms(),
        }
    }
}

// ── Reminders ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemindersConfig {
    /// Chance of injecting a reminder on a non-threshold post-tool event
    #[serde(default = "default_reminder_probability")]
    pub probability: f64,

    /// Optional file with one reminder per line; `#` lines are comments
    #[serde(default)]
    pub file: Option<PathBuf>,

    /// Inline reminder lines, used when no file is configured
    #[serde(default = "default_reminder_lines")]
    pub lines: Vec<String>,
}

fn default_reminder_probability() -> f64 {
    0.3
}

fn default_reminder_lines() -> Vec<String> {
    [
        "Re-read the original request before expanding scope.",
        "Surface failures loudly; never paper over an error to keep moving.",
        "If the current step was not asked for, stop and say so.",
    ]
    .map(String::from)
    .to_vec()
}

impl Default for RemindersConfig {
    fn default() -> Self {
        Self {
            probability: default_reminder_probability(),
            file: None,
            lines: default_reminder_lines(),
        }
    }
}

impl RemindersConfig {
    /// Reminder pool: configured file when readable, inline lines otherwise.
    pub fn pool(&self) -> Vec<String> {
        if let Some(path) = &self.file
            && let Ok(raw) = fs::read_to_string(path)
        {
            let lines: Vec<String> = raw
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty() && !l.starts_with('#'))
                .map(String::from)
                .collect();
            if !lines.is_empty() {
                return lines;
            }
        }
        self.lines.clone()
    }
}

// ── Context artifacts ─────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactsConfig {
    /// Directory for rendered context artifacts; defaults to the system
    /// temp dir so delegate sub-tasks can read them from any cwd
    #[serde(default)]
    pub dir: Option<PathBuf>,

    /// Artifacts older than this are swept on render (default: 1h)
    #[serde(default = "default_artifact_max_age_secs")]
    pub max_age_secs: u64,
}

fn default_artifact_max_age_secs() -> u64 {
    3600
}

impl Default for ArtifactsConfig {
    fn default() -> Self {
        Self {
            dir: None,
            max_age_secs: default_artifact_max_age_secs(),
        }
    }
}

impl ArtifactsConfig {
    pub fn resolved_dir(&self) -> PathBuf {
        self.dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("toolgate-artifacts"))
    }
}
