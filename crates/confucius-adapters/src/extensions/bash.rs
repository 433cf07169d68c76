use super::truncate_chars;
use crate::process::{self, CommandSpec};
use confucius_core::{Extension, ExtensionError, RunContext, WorkspaceConfig};
use confucius_proto::{Action, ActionKind};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

/// Runs `<bash>` actions with `sh -c` in the workspace directory.
///
/// Commands containing a blocked substring are refused without running.
/// Stdout and stderr are combined and truncated; a non-zero exit is
/// recorded as an error carrying the same output. The last command and
/// its exit code are kept in the context attributes.
#[derive(Debug, Clone)]
pub struct BashExtension {
    working_dir: PathBuf,
    timeout: Duration,
    blocked_commands: Vec<String>,
    max_output_chars: usize,
}

impl BashExtension {
    pub fn new(working_dir: impl AsRef<Path>) -> Self {
        Self::from_config(&WorkspaceConfig {
            root: working_dir.as_ref().to_string_lossy().into_owned(),
            ..WorkspaceConfig::default()
        })
    }

    pub fn from_config(config: &WorkspaceConfig) -> Self {
        Self {
            working_dir: PathBuf::from(&config.root),
            timeout: Duration::from_secs(config.bash_timeout_secs),
            blocked_commands: config.blocked_commands.clone(),
            max_output_chars: config.max_output_chars,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_blocked_commands(mut self, blocked: Vec<String>) -> Self {
        self.blocked_commands = blocked;
        self
    }

    fn blocked_by(&self, command: &str) -> Option<&str> {
        self.blocked_commands
            .iter()
            .find(|blocked| command.contains(blocked.as_str()))
            .map(String::as_str)
    }
}

impl Extension for BashExtension {
    fn name(&self) -> &str {
        "bash"
    }

    fn can_handle(&self, action: &Action) -> bool {
        action.kind == ActionKind::BashCommand
    }

    fn execute(&self, action: &mut Action, ctx: &mut RunContext) -> Result<(), ExtensionError> {
        let command = action.content.trim().to_string();

        if let Some(pattern) = self.blocked_by(&command) {
            warn!(command = %command, pattern, "Refusing blocked command");
            action.set_error(format!("Blocked dangerous command: {command}"));
            return Ok(());
        }

        let spec = CommandSpec::shell(&command).current_dir(&self.working_dir);
        let output = match process::run_blocking(&spec, Some(self.timeout)) {
            Ok(output) => output,
            Err(e) => {
                action.set_error(format!("Execution error: {e}"));
                return Ok(());
            }
        };

        if output.timed_out {
            action.set_error(format!("Command timed out after {:?}", self.timeout));
            return Ok(());
        }

        let exit_code = output.exit_code.unwrap_or(-1);
        debug!(command = %command, exit_code, "Shell command finished");

        ctx.set_attribute("last_command", command);
        ctx.set_attribute("last_exit_code", exit_code);

        let text = truncate_chars(&output.combined(), self.max_output_chars);
        if output.success() {
            action.set_result(text);
        } else {
            action.set_error(format!("Command failed with exit code {exit_code}\n{text}"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use confucius_core::MemoryManager;
    use tempfile::TempDir;

    fn ctx() -> RunContext {
        RunContext::new("bash-test", MemoryManager::default())
    }

    fn run(ext: &BashExtension, command: &str, ctx: &mut RunContext) -> Action {
        let mut action = Action::new(ActionKind::BashCommand, command);
        ext.execute(&mut action, ctx).unwrap();
        action
    }

    #[test]
    fn test_runs_in_working_dir() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("marker.txt"), "").unwrap();
        let ext = BashExtension::new(dir.path());
        let mut ctx = ctx();

        let action = run(&ext, "ls", &mut ctx);

        assert_eq!(action.result(), Some("marker.txt\n"));
        assert_eq!(ctx.attribute("last_command").unwrap(), "ls");
        assert_eq!(ctx.attribute("last_exit_code").unwrap(), 0);
    }

    #[test]
    fn test_nonzero_exit_is_error_with_output() {
        let dir = TempDir::new().unwrap();
        let ext = BashExtension::new(dir.path());
        let mut ctx = ctx();

        let action = run(&ext, "echo oops >&2; exit 3", &mut ctx);

        let error = action.error().unwrap();
        assert!(error.starts_with("Command failed with exit code 3"));
        assert!(error.contains("oops"));
        assert!(action.result().is_none());
        assert_eq!(ctx.attribute("last_exit_code").unwrap(), 3);
    }

    #[test]
    fn test_blocked_command_not_run() {
        let dir = TempDir::new().unwrap();
        let ext = BashExtension::new(dir.path());
        let mut ctx = ctx();

        let action = run(&ext, "sudo rm -rf / --no-preserve-root", &mut ctx);

        assert!(action.error().unwrap().starts_with("Blocked dangerous command"));
        assert!(ctx.attribute("last_command").is_none());
    }

    #[test]
    fn test_output_truncated() {
        let dir = TempDir::new().unwrap();
        let ext = BashExtension::new(dir.path());

        let action = run(&ext, "head -c 5000 /dev/zero | tr '\\0' 'a'", &mut ctx());

        let result = action.result().unwrap();
        assert!(result.starts_with(&"a".repeat(2000)));
        assert!(result.ends_with("[... truncated 3000 characters ...]"));
    }

    #[test]
    fn test_timeout_reported() {
        let dir = TempDir::new().unwrap();
        let ext = BashExtension::new(dir.path()).with_timeout(Duration::from_millis(100));

        let action = run(&ext, "sleep 5", &mut ctx());

        assert_eq!(action.error(), Some("Command timed out after 100ms"));
    }
}
