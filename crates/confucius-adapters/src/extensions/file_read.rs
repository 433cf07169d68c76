use super::truncate_chars;
use crate::workspace::Workspace;
use confucius_core::{Extension, ExtensionError, RunContext, WorkspaceConfig};
use confucius_proto::{Action, ActionKind};
use std::path::Path;
use tracing::debug;

/// Reads `<file_read>path</file_read>` into the transcript.
///
/// The full content is also stored as the `file:<path>` artifact, even when
/// the result shown to the model is truncated.
#[derive(Debug, Clone)]
pub struct FileReadExtension {
    workspace: Workspace,
    max_chars: usize,
}

impl FileReadExtension {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            workspace: Workspace::new(root),
            max_chars: WorkspaceConfig::default().max_read_chars,
        }
    }

    pub fn with_max_chars(mut self, max_chars: usize) -> Self {
        self.max_chars = max_chars;
        self
    }
}

impl Extension for FileReadExtension {
    fn name(&self) -> &str {
        "file_read"
    }

    fn can_handle(&self, action: &Action) -> bool {
        action.kind == ActionKind::FileRead
    }

    fn execute(&self, action: &mut Action, ctx: &mut RunContext) -> Result<(), ExtensionError> {
        let rel = match action.content.trim() {
            "" => action.attribute("path").unwrap_or_default().trim().to_string(),
            content => content.to_string(),
        };

        let full = match self.workspace.resolve(&rel) {
            Ok(full) => full,
            Err(e) => {
                action.set_error(e.to_string());
                return Ok(());
            }
        };

        if !full.is_file() {
            action.set_error(format!("File not found: {rel}"));
            return Ok(());
        }

        match std::fs::read_to_string(&full) {
            Ok(content) => {
                debug!(path = %rel, chars = content.len(), "Read file");
                action.set_result(truncate_chars(&content, self.max_chars));
                ctx.set_artifact(format!("file:{rel}"), content);
            }
            Err(e) => action.set_error(format!("Failed to read file: {e}")),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use confucius_core::MemoryManager;
    use tempfile::TempDir;

    fn read(ext: &FileReadExtension, path: &str, ctx: &mut RunContext) -> Action {
        let mut action = Action::new(ActionKind::FileRead, path);
        ext.execute(&mut action, ctx).unwrap();
        action
    }

    fn ctx() -> RunContext {
        RunContext::new("read-test", MemoryManager::default())
    }

    #[test]
    fn test_reads_and_stores_artifact() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("notes.md"), "# Notes").unwrap();
        let ext = FileReadExtension::new(dir.path());
        let mut ctx = ctx();

        let action = read(&ext, "notes.md", &mut ctx);

        assert_eq!(action.result(), Some("# Notes"));
        assert_eq!(ctx.artifact("file:notes.md").unwrap(), "# Notes");
    }

    #[test]
    fn test_missing_file_is_not_found_error() {
        let dir = TempDir::new().unwrap();
        let ext = FileReadExtension::new(dir.path());

        let action = read(&ext, "missing.txt", &mut ctx());

        assert!(action.error().unwrap().contains("not found"));
        assert!(action.result().is_none());
    }

    #[test]
    fn test_large_file_truncated_but_artifact_complete() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("big.txt"), "x".repeat(12_000)).unwrap();
        let ext = FileReadExtension::new(dir.path());
        let mut ctx = ctx();

        let action = read(&ext, "big.txt", &mut ctx);

        let result = action.result().unwrap();
        assert!(result.ends_with("[... truncated 2000 characters ...]"));
        assert_eq!(ctx.artifact("file:big.txt").unwrap().as_str().unwrap().len(), 12_000);
    }

    #[test]
    fn test_escape_rejected() {
        let dir = TempDir::new().unwrap();
        let ext = FileReadExtension::new(dir.path());

        let action = read(&ext, "../../etc/passwd", &mut ctx());

        assert!(action.error().unwrap().starts_with("File path outside workspace"));
    }
}
