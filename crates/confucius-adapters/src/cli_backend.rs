//! Headless AI CLIs used as the model behind the orchestrator.
//!
//! A [`CliBackend`] knows how to hand one prompt to a tool such as
//! `claude -p` and read the reply from stdout. [`CliLlm`] wraps a backend
//! as an [`LlmClient`]: each call flattens the transcript into a single
//! prompt and runs the tool once.

use crate::auto_detect::{NoBackendError, detect_backend};
use crate::process::{self, CommandSpec};
use confucius_core::{AgentConfig, CliConfig};
use confucius_proto::{LlmClient, LlmError, Message, Role};
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;
use tempfile::NamedTempFile;
use tracing::{debug, trace, warn};

/// Prompts longer than this are handed to claude through a file.
const LARGE_PROMPT_CHARS: usize = 7000;

/// Error when creating a custom backend without a command.
#[derive(Debug, Clone, thiserror::Error)]
#[error("custom backend requires a command to be specified")]
pub struct CustomBackendError;

/// Failure to resolve a backend from configuration.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error(transparent)]
    Custom(#[from] CustomBackendError),

    #[error(transparent)]
    NotFound(#[from] NoBackendError),

    #[error("unknown backend '{0}'")]
    Unknown(String),
}

/// How to pass prompts to the CLI tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptMode {
    /// Pass prompt as a command-line argument.
    Arg,
    /// Write prompt to stdin.
    Stdin,
}

/// A command line that answers one prompt.
#[derive(Debug, Clone)]
pub struct CliBackend {
    pub command: String,
    /// Arguments placed before the prompt.
    pub args: Vec<String>,
    pub prompt_mode: PromptMode,
    /// Flag placed before the prompt argument (if `prompt_mode` is `Arg`).
    pub prompt_flag: Option<String>,
}

/// A ready-to-run command. Keep it alive until the process exits: it may
/// own the temp file the prompt was written to.
#[derive(Debug)]
pub struct PreparedCommand {
    pub spec: CommandSpec,
    pub temp_file: Option<NamedTempFile>,
}

impl CliBackend {
    /// Creates a backend from configuration.
    ///
    /// `auto` is not resolved here; see [`CliLlm::from_config`].
    pub fn from_config(config: &CliConfig) -> Result<Self, BackendError> {
        match config.backend.as_str() {
            "custom" => Ok(Self::custom(config)?),
            name => Self::from_name(name),
        }
    }

    /// Creates a preset backend by name.
    pub fn from_name(name: &str) -> Result<Self, BackendError> {
        match name {
            "claude" => Ok(Self::claude()),
            "kiro" => Ok(Self::kiro()),
            "gemini" => Ok(Self::gemini()),
            "codex" => Ok(Self::codex()),
            "amp" => Ok(Self::amp()),
            other => Err(BackendError::Unknown(other.to_string())),
        }
    }

    /// Claude in print mode with plain text output.
    pub fn claude() -> Self {
        Self {
            command: "claude".to_string(),
            args: vec!["--output-format".to_string(), "text".to_string()],
            prompt_mode: PromptMode::Arg,
            prompt_flag: Some("-p".to_string()),
        }
    }

    pub fn kiro() -> Self {
        Self {
            command: "kiro-cli".to_string(),
            args: vec!["chat".to_string(), "--no-interactive".to_string()],
            prompt_mode: PromptMode::Arg,
            prompt_flag: None,
        }
    }

    pub fn gemini() -> Self {
        Self {
            command: "gemini".to_string(),
            args: Vec::new(),
            prompt_mode: PromptMode::Arg,
            prompt_flag: Some("-p".to_string()),
        }
    }

    /// Codex `exec` takes the prompt positionally.
    pub fn codex() -> Self {
        Self {
            command: "codex".to_string(),
            args: vec!["exec".to_string()],
            prompt_mode: PromptMode::Arg,
            prompt_flag: None,
        }
    }

    pub fn amp() -> Self {
        Self {
            command: "amp".to_string(),
            args: Vec::new(),
            prompt_mode: PromptMode::Arg,
            prompt_flag: Some("-x".to_string()),
        }
    }

    /// Creates a custom backend from configuration.
    pub fn custom(config: &CliConfig) -> Result<Self, CustomBackendError> {
        let command = config.command.clone().ok_or(CustomBackendError)?;
        let prompt_mode = if config.prompt_mode == "stdin" {
            PromptMode::Stdin
        } else {
            PromptMode::Arg
        };

        Ok(Self {
            command,
            args: config.args.clone(),
            prompt_mode,
            prompt_flag: config.prompt_flag.clone(),
        })
    }

    /// Builds the command that sends `prompt` to this backend.
    pub fn build_command(&self, prompt: &str) -> PreparedCommand {
        let mut spec = CommandSpec::new(&self.command).args(self.args.iter().cloned());

        let temp_file = match self.prompt_mode {
            PromptMode::Arg => {
                let (prompt_text, temp_file) = if self.command == "claude" && prompt.len() > LARGE_PROMPT_CHARS {
                    match write_prompt_file(prompt) {
                        Ok(file) => {
                            let text = format!("Please read and answer the conversation in {}", file.path().display());
                            (text, Some(file))
                        }
                        Err(e) => {
                            warn!(error = %e, "Failed to write prompt to temp file");
                            (prompt.to_string(), None)
                        }
                    }
                } else {
                    (prompt.to_string(), None)
                };

                if let Some(ref flag) = self.prompt_flag {
                    spec = spec.arg(flag);
                }
                spec = spec.arg(prompt_text);
                temp_file
            }
            PromptMode::Stdin => {
                spec = spec.stdin(prompt);
                None
            }
        };

        debug!(
            command = %self.command,
            args_count = spec.args.len(),
            prompt_len = prompt.len(),
            uses_stdin = spec.stdin.is_some(),
            uses_temp_file = temp_file.is_some(),
            "Built CLI command"
        );
        trace!(prompt = %prompt, "Full prompt content");

        PreparedCommand { spec, temp_file }
    }
}

fn write_prompt_file(prompt: &str) -> std::io::Result<NamedTempFile> {
    let mut file = NamedTempFile::new()?;
    file.write_all(prompt.as_bytes())?;
    file.flush()?;
    Ok(file)
}

/// Renders a transcript as one prompt for a single-shot CLI.
pub fn flatten_transcript(messages: &[Message]) -> String {
    let mut prompt = String::new();
    for message in messages {
        let heading = match message.role {
            Role::System => "System",
            Role::User => "User",
            Role::Assistant => "Assistant",
        };
        prompt.push_str("### ");
        prompt.push_str(heading);
        prompt.push_str("\n\n");
        prompt.push_str(message.content.trim_end());
        prompt.push_str("\n\n");
    }
    prompt.push_str("### Assistant\n\nReply with the assistant's next message only.\n");
    prompt
}

/// An [`LlmClient`] backed by a headless CLI tool.
#[derive(Debug, Clone)]
pub struct CliLlm {
    backend: CliBackend,
    timeout: Option<Duration>,
    cwd: Option<PathBuf>,
}

impl CliLlm {
    pub fn new(backend: CliBackend) -> Self {
        Self {
            backend,
            timeout: None,
            cwd: None,
        }
    }

    /// Resolves the configured backend, running auto-detection for `auto`.
    pub fn from_config(config: &AgentConfig) -> Result<Self, BackendError> {
        let backend = if config.cli.backend == "auto" {
            let name = detect_backend(&config.agent_priority(), |_| true)?;
            CliBackend::from_name(&name)?
        } else {
            CliBackend::from_config(&config.cli)?
        };

        Ok(Self::new(backend)
            .with_timeout(config.cli.timeout_secs.map(Duration::from_secs))
            .with_working_dir(&config.workspace.root))
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn backend(&self) -> &CliBackend {
        &self.backend
    }
}

impl LlmClient for CliLlm {
    fn complete(&self, messages: &[Message]) -> Result<String, LlmError> {
        let prompt = flatten_transcript(messages);
        let PreparedCommand { mut spec, temp_file } = self.backend.build_command(&prompt);
        if let Some(ref cwd) = self.cwd {
            spec = spec.current_dir(cwd);
        }

        let output = process::run_blocking(&spec, self.timeout)?;
        drop(temp_file);

        if output.timed_out {
            return Err(LlmError::Timeout(self.timeout.unwrap_or_default()));
        }

        if !output.success() {
            let detail = output.stderr.trim();
            return Err(LlmError::backend(format!(
                "{} exited with {}: {}",
                self.backend.command,
                output
                    .exit_code
                    .map_or_else(|| "signal".to_string(), |code| format!("code {code}")),
                if detail.is_empty() { "no stderr" } else { detail }
            )));
        }

        debug!(
            command = %self.backend.command,
            reply_len = output.stdout.len(),
            "CLI backend replied"
        );
        Ok(output.stdout.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn custom(command: &str, args: &[&str], prompt_mode: &str) -> CliConfig {
        CliConfig {
            backend: "custom".to_string(),
            command: Some(command.to_string()),
            args: args.iter().map(|s| s.to_string()).collect(),
            prompt_mode: prompt_mode.to_string(),
            ..CliConfig::default()
        }
    }

    #[test]
    fn test_claude_backend() {
        let prepared = CliBackend::claude().build_command("test prompt");

        assert_eq!(prepared.spec.program, "claude");
        assert_eq!(prepared.spec.args, vec!["--output-format", "text", "-p", "test prompt"]);
        assert!(prepared.spec.stdin.is_none());
        assert!(prepared.temp_file.is_none());
    }

    #[test]
    fn test_claude_large_prompt_uses_temp_file() {
        let prompt = "x".repeat(LARGE_PROMPT_CHARS + 1);
        let prepared = CliBackend::claude().build_command(&prompt);

        let file = prepared.temp_file.as_ref().unwrap();
        let last = prepared.spec.args.last().unwrap();
        assert!(last.contains(&file.path().display().to_string()));
        assert_eq!(std::fs::read_to_string(file.path()).unwrap(), prompt);
    }

    #[test]
    fn test_non_claude_large_prompt_stays_inline() {
        let prompt = "x".repeat(LARGE_PROMPT_CHARS + 1);
        let prepared = CliBackend::gemini().build_command(&prompt);

        assert!(prepared.temp_file.is_none());
        assert_eq!(prepared.spec.args.last().unwrap(), &prompt);
    }

    #[test]
    fn test_presets() {
        let kiro = CliBackend::kiro().build_command("p");
        assert_eq!(kiro.spec.program, "kiro-cli");
        assert_eq!(kiro.spec.args, vec!["chat", "--no-interactive", "p"]);

        let codex = CliBackend::codex().build_command("p");
        assert_eq!(codex.spec.args, vec!["exec", "p"]);

        let amp = CliBackend::amp().build_command("p");
        assert_eq!(amp.spec.args, vec!["-x", "p"]);
    }

    #[test]
    fn test_from_name() {
        assert_eq!(CliBackend::from_name("gemini").unwrap().command, "gemini");
        assert!(matches!(
            CliBackend::from_name("nope"),
            Err(BackendError::Unknown(name)) if name == "nope"
        ));
    }

    #[test]
    fn test_custom_backend_stdin() {
        let backend = CliBackend::from_config(&custom("cat", &[], "stdin")).unwrap();
        let prepared = backend.build_command("hello");

        assert_eq!(backend.prompt_mode, PromptMode::Stdin);
        assert!(prepared.spec.args.is_empty());
        assert_eq!(prepared.spec.stdin.as_deref(), Some("hello"));
    }

    #[test]
    fn test_custom_backend_with_prompt_flag() {
        let mut config = custom("my-llm", &["--fast"], "arg");
        config.prompt_flag = Some("--prompt".to_string());
        let prepared = CliBackend::from_config(&config).unwrap().build_command("go");

        assert_eq!(prepared.spec.args, vec!["--fast", "--prompt", "go"]);
    }

    #[test]
    fn test_custom_backend_without_command_returns_error() {
        let config = CliConfig {
            backend: "custom".to_string(),
            ..CliConfig::default()
        };
        let err = CliBackend::from_config(&config).unwrap_err();
        assert_eq!(err.to_string(), "custom backend requires a command to be specified");
    }

    #[test]
    fn test_flatten_transcript() {
        let prompt = flatten_transcript(&[Message::system("be terse"), Message::user("hi")]);

        assert!(prompt.starts_with("### System\n\nbe terse\n\n### User\n\nhi\n\n"));
        assert!(prompt.ends_with("Reply with the assistant's next message only.\n"));
    }

    #[test]
    fn test_cli_llm_round_trip_through_cat() {
        let backend = CliBackend::from_config(&custom("cat", &[], "stdin")).unwrap();
        let llm = CliLlm::new(backend);

        let reply = llm.complete(&[Message::user("ping")]).unwrap();
        assert!(reply.contains("### User\n\nping"));
    }

    #[test]
    fn test_cli_llm_nonzero_exit_is_backend_error() {
        let backend = CliBackend::from_config(&custom("false", &[], "stdin")).unwrap();
        let err = CliLlm::new(backend).complete(&[Message::user("x")]).unwrap_err();

        assert!(matches!(err, LlmError::Backend(_)));
        assert!(err.to_string().contains("false exited with code 1"));
    }

    #[test]
    fn test_cli_llm_timeout() {
        let backend = CliBackend::from_config(&custom("sleep", &["10"], "stdin")).unwrap();
        let llm = CliLlm::new(backend).with_timeout(Some(Duration::from_millis(100)));

        let err = llm.complete(&[Message::user("x")]).unwrap_err();
        assert!(matches!(err, LlmError::Timeout(_)));
    }
}
