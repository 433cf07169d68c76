//! Configuration types for Confucius Agent.
//!
//! Configuration is YAML. The nested format groups settings by component;
//! a handful of flat shortcut fields are also accepted and folded into the
//! nested sections by [`AgentConfig::normalize`]:
//!
//! ```yaml
//! completion_promise: "SHIP_IT"   # shortcut for ralph.completion_promise
//! orchestrator:
//!   max_iterations: 30
//! memory:
//!   max_tokens: 50000
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Outer retry loop settings.
    #[serde(default)]
    pub ralph: RalphLoopConfig,

    /// Inner action loop settings.
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,

    /// Working memory budget.
    #[serde(default)]
    pub memory: MemoryConfig,

    /// Delegation to subagents.
    #[serde(default)]
    pub subagents: SubagentConfig,

    /// Filesystem and shell scoping for the built-in extensions.
    #[serde(default)]
    pub workspace: WorkspaceConfig,

    /// Optional extensions.
    #[serde(default)]
    pub extensions: ExtensionsConfig,

    /// LLM backend selection.
    #[serde(default)]
    pub cli: CliConfig,

    // ─────────────────────────────────────────────────────────────────────────
    // FLAT SHORTCUTS
    // These map to nested fields; see `normalize`.
    // ─────────────────────────────────────────────────────────────────────────

    /// Shortcut for `ralph.completion_promise`.
    #[serde(default)]
    pub completion_promise: Option<String>,

    /// Shortcut for `ralph.max_iterations`.
    #[serde(default)]
    pub max_iterations: Option<u32>,

    /// Shortcut for `ralph.notes_path`.
    #[serde(default)]
    pub notes_path: Option<String>,

    /// Suppress all validation warnings.
    #[serde(default, rename = "_suppress_warnings")]
    pub suppress_warnings: bool,
}

impl AgentConfig {
    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();
        debug!(path = %path_ref.display(), "Loading configuration from file");
        let content = std::fs::read_to_string(path_ref)?;
        let config: Self = serde_yaml::from_str(&content)?;
        debug!(
            backend = %config.cli.backend,
            ralph_max_iterations = config.ralph.max_iterations,
            "Configuration loaded"
        );
        Ok(config)
    }

    /// Serializes the configuration as YAML.
    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Folds flat shortcut fields into the nested sections.
    ///
    /// Shortcuts take precedence over nested values when both are present.
    pub fn normalize(&mut self) {
        let mut normalized_count = 0;

        if let Some(ref cp) = self.completion_promise {
            debug!(from = "completion_promise", to = "ralph.completion_promise", "Normalizing shortcut field");
            self.ralph.completion_promise = cp.clone();
            normalized_count += 1;
        }

        if let Some(mi) = self.max_iterations {
            debug!(from = "max_iterations", to = "ralph.max_iterations", value = mi, "Normalizing shortcut field");
            self.ralph.max_iterations = mi;
            normalized_count += 1;
        }

        if let Some(ref np) = self.notes_path {
            debug!(from = "notes_path", to = "ralph.notes_path", value = %np, "Normalizing shortcut field");
            self.ralph.notes_path = np.clone();
            normalized_count += 1;
        }

        if normalized_count > 0 {
            debug!(fields_normalized = normalized_count, "Shortcut normalization complete");
        }
    }

    /// Validates the configuration.
    ///
    /// Unusable values are errors; suspicious but workable values come back
    /// as warnings for the caller to display.
    pub fn validate(&self) -> Result<Vec<ConfigWarning>, ConfigError> {
        let threshold = self.memory.compression_threshold;
        if !(threshold > 0.0 && threshold <= 1.0) {
            return Err(ConfigError::InvalidValue {
                field: "memory.compression_threshold".to_string(),
                message: format!("must be in (0, 1], got {threshold}"),
            });
        }

        if self.memory.max_tokens == 0 {
            return Err(ConfigError::InvalidValue {
                field: "memory.max_tokens".to_string(),
                message: "token budget must be positive".to_string(),
            });
        }

        if self.cli.backend == "custom" && self.cli.command.is_none() {
            return Err(ConfigError::InvalidValue {
                field: "cli.command".to_string(),
                message: "custom backend requires a command".to_string(),
            });
        }

        let mut warnings = Vec::new();
        if self.suppress_warnings {
            return Ok(warnings);
        }

        if self.ralph.max_iterations == 0 {
            warnings.push(ConfigWarning::InvalidValue {
                field: "ralph.max_iterations".to_string(),
                message: "0 outer iterations means the task never runs".to_string(),
            });
        }

        if self.orchestrator.max_iterations == 0 {
            warnings.push(ConfigWarning::InvalidValue {
                field: "orchestrator.max_iterations".to_string(),
                message: "0 inner iterations means the model is never called".to_string(),
            });
        }

        if self.subagents.enabled && self.subagents.max_depth == 0 {
            warnings.push(ConfigWarning::InvalidValue {
                field: "subagents.max_depth".to_string(),
                message: "subagents are enabled but every delegation will be rejected".to_string(),
            });
        }

        if self.ralph.enable_notes && self.ralph.notes_path.trim().is_empty() {
            warnings.push(ConfigWarning::InvalidValue {
                field: "ralph.notes_path".to_string(),
                message: "notes are enabled without a path; notes will be skipped".to_string(),
            });
        }

        if self.ralph.delay_seconds > 300 {
            warnings.push(ConfigWarning::Suspicious {
                field: "ralph.delay_seconds".to_string(),
                message: format!(
                    "{}s between iterations; the delay is not interruptible",
                    self.ralph.delay_seconds
                ),
            });
        }

        Ok(warnings)
    }

    /// Returns the backend priority list for auto-detection.
    /// If empty, returns the default priority order.
    pub fn agent_priority(&self) -> Vec<&str> {
        if self.cli.agent_priority.is_empty() {
            vec!["claude", "kiro", "gemini", "codex", "amp"]
        } else {
            self.cli.agent_priority.iter().map(|s| s.as_str()).collect()
        }
    }
}

/// Configuration warnings emitted during validation.
#[derive(Debug, Clone)]
pub enum ConfigWarning {
    /// Field has a value that disables part of the system.
    InvalidValue { field: String, message: String },
    /// Field has a legal but unusual value.
    Suspicious { field: String, message: String },
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigWarning::InvalidValue { field, message } => {
                write!(f, "Warning [{}]: {}", field, message)
            }
            ConfigWarning::Suspicious { field, message } => {
                write!(f, "Warning [{}]: Unusual value - {}", field, message)
            }
        }
    }
}

/// Ralph outer loop configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RalphLoopConfig {
    /// Literal string whose appearance in a run's output ends the loop.
    #[serde(default = "default_completion_promise")]
    pub completion_promise: String,

    /// Maximum number of outer iterations.
    #[serde(default = "default_ralph_iterations")]
    pub max_iterations: u32,

    /// Pause between outer iterations, in seconds.
    #[serde(default = "default_delay_seconds")]
    pub delay_seconds: u64,

    /// Distill the trajectory into notes when the loop ends.
    #[serde(default = "default_true")]
    pub enable_notes: bool,

    /// Root directory for notes.
    #[serde(default = "default_notes_path")]
    pub notes_path: String,

    /// Directory for JSONL trajectory files. Disabled when unset.
    #[serde(default)]
    pub trace_dir: Option<String>,

    /// Log each outer iteration at info level.
    #[serde(default = "default_true")]
    pub verbose: bool,
}

fn default_true() -> bool {
    true
}

fn default_completion_promise() -> String {
    "TASK_COMPLETE".to_string()
}

fn default_ralph_iterations() -> u32 {
    20
}

fn default_delay_seconds() -> u64 {
    2
}

fn default_notes_path() -> String {
    ".confucius/notes".to_string()
}

impl Default for RalphLoopConfig {
    fn default() -> Self {
        Self {
            completion_promise: default_completion_promise(),
            max_iterations: default_ralph_iterations(),
            delay_seconds: default_delay_seconds(),
            enable_notes: true,
            notes_path: default_notes_path(),
            trace_dir: None,
            verbose: true,
        }
    }
}

/// Inner orchestrator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Maximum model calls per run.
    #[serde(default = "default_orchestrator_iterations")]
    pub max_iterations: u32,

    /// Replaces the built-in system prompt when set.
    #[serde(default)]
    pub system_prompt: Option<String>,
}

fn default_orchestrator_iterations() -> u32 {
    50
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_orchestrator_iterations(),
            system_prompt: None,
        }
    }
}

/// Working memory budget.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,

    /// Fraction of `max_tokens` at which history is compressed.
    #[serde(default = "default_compression_threshold")]
    pub compression_threshold: f64,

    #[serde(default = "default_chars_per_token")]
    pub chars_per_token: usize,
}

fn default_max_tokens() -> usize {
    100_000
}

fn default_compression_threshold() -> f64 {
    0.8
}

fn default_chars_per_token() -> usize {
    4
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            compression_threshold: default_compression_threshold(),
            chars_per_token: default_chars_per_token(),
        }
    }
}

/// Subagent delegation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubagentConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Maximum live nesting depth.
    #[serde(default = "default_max_depth")]
    pub max_depth: u32,

    /// Iteration cap for each subagent run.
    #[serde(default = "default_subagent_iterations")]
    pub max_iterations: u32,
}

fn default_max_depth() -> u32 {
    2
}

fn default_subagent_iterations() -> u32 {
    10
}

impl Default for SubagentConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_depth: default_max_depth(),
            max_iterations: default_subagent_iterations(),
        }
    }
}

/// Workspace scoping for file and shell extensions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceConfig {
    /// Root directory; file actions may not escape it.
    #[serde(default = "default_workspace_root")]
    pub root: String,

    #[serde(default = "default_bash_timeout")]
    pub bash_timeout_secs: u64,

    /// Substrings that cause a shell command to be refused.
    #[serde(default = "default_blocked_commands")]
    pub blocked_commands: Vec<String>,

    /// Shell output beyond this many characters is cut.
    #[serde(default = "default_max_output_chars")]
    pub max_output_chars: usize,

    /// File reads beyond this many characters are cut.
    #[serde(default = "default_max_read_chars")]
    pub max_read_chars: usize,
}

fn default_workspace_root() -> String {
    ".".to_string()
}

fn default_bash_timeout() -> u64 {
    30
}

fn default_blocked_commands() -> Vec<String> {
    vec!["rm -rf /".to_string(), "mkfs".to_string(), "dd if=".to_string()]
}

fn default_max_output_chars() -> usize {
    2000
}

fn default_max_read_chars() -> usize {
    10_000
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            root: default_workspace_root(),
            bash_timeout_secs: default_bash_timeout(),
            blocked_commands: default_blocked_commands(),
            max_output_chars: default_max_output_chars(),
            max_read_chars: default_max_read_chars(),
        }
    }
}

/// Optional extensions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtensionsConfig {
    /// Inject planning guidance on the first turn.
    #[serde(default = "default_true")]
    pub planning: bool,

    /// Mark long system prompts as cacheable.
    #[serde(default)]
    pub prompt_cache: bool,

    /// Provider name the cache hints are shaped for.
    #[serde(default = "default_cache_provider")]
    pub cache_provider: String,
}

fn default_cache_provider() -> String {
    "anthropic".to_string()
}

impl Default for ExtensionsConfig {
    fn default() -> Self {
        Self {
            planning: true,
            prompt_cache: false,
            cache_provider: default_cache_provider(),
        }
    }
}

/// LLM backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CliConfig {
    /// Backend to use: "claude", "kiro", "gemini", "codex", "amp", "auto", or "custom".
    #[serde(default = "default_backend")]
    pub backend: String,

    /// Custom command (for backend: "custom").
    #[serde(default)]
    pub command: Option<String>,

    /// Extra arguments for the custom command.
    #[serde(default)]
    pub args: Vec<String>,

    /// How to pass prompts: "arg" or "stdin".
    #[serde(default = "default_prompt_mode")]
    pub prompt_mode: String,

    /// Flag placed before the prompt argument (e.g. "-p").
    #[serde(default)]
    pub prompt_flag: Option<String>,

    /// Per-call timeout in seconds. No timeout when unset.
    #[serde(default)]
    pub timeout_secs: Option<u64>,

    /// Fallback order for auto-detection.
    #[serde(default)]
    pub agent_priority: Vec<String>,
}

fn default_backend() -> String {
    "claude".to_string()
}

fn default_prompt_mode() -> String {
    "arg".to_string()
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            command: None,
            args: Vec::new(),
            prompt_mode: default_prompt_mode(),
            prompt_flag: None,
            timeout_secs: None,
            agent_priority: Vec::new(),
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid value for '{field}': {message}")]
    InvalidValue { field: String, message: String },
}
