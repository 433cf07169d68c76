use crate::workspace::Workspace;
use confucius_core::{Extension, ExtensionError, RunContext};
use confucius_proto::{Action, ActionKind};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;
use tracing::debug;

const SEARCH_MARKER: &str = "<<<SEARCH>>>";
const REPLACE_MARKER: &str = "<<<REPLACE>>>";

/// One search/replace pair from a patch body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchBlock {
    pub search: String,
    pub replace: String,
}

/// Parses `<<<SEARCH>>> old <<<REPLACE>>> new` blocks.
///
/// A replacement runs until the next `<<<NAME>>>` marker (such as
/// `<<<END>>>`) or the end of the body, so shell here-strings (`<<<`) in the
/// replacement survive. Both halves are trimmed.
pub fn parse_patch(body: &str) -> Vec<PatchBlock> {
    body.split(SEARCH_MARKER)
        .skip(1)
        .filter_map(|chunk| {
            let (search, rest) = chunk.split_once(REPLACE_MARKER)?;
            let replace = marker_start(rest).map_or(rest, |end| &rest[..end]);
            Some(PatchBlock {
                search: search.trim().to_string(),
                replace: replace.trim().to_string(),
            })
        })
        .collect()
}

/// Byte offset of the first `<<<NAME>>>` marker, NAME being uppercase
/// letters or underscores.
fn marker_start(text: &str) -> Option<usize> {
    text.match_indices("<<<").map(|(i, _)| i).find(|&i| {
        let after = &text[i + 3..];
        let name_len = after
            .bytes()
            .take_while(|b| b.is_ascii_uppercase() || *b == b'_')
            .count();
        name_len > 0 && after[name_len..].starts_with(">>>")
    })
}

/// Handles `<file_edit path="..." operation="...">` actions.
///
/// Operations: `write` (default) and its alias `create`, `append`,
/// `delete`, and `patch`.
#[derive(Debug, Clone)]
pub struct FileEditExtension {
    workspace: Workspace,
}

impl FileEditExtension {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            workspace: Workspace::new(root),
        }
    }

    fn apply(&self, operation: &str, rel: &str, full: &Path, body: &str) -> std::io::Result<Result<String, String>> {
        let outcome = match operation {
            "write" | "create" => {
                if let Some(parent) = full.parent() {
                    fs::create_dir_all(parent)?;
                }
                fs::write(full, body)?;
                Ok(format!("File written successfully: {rel}"))
            }
            "append" => {
                if let Some(parent) = full.parent() {
                    fs::create_dir_all(parent)?;
                }
                let mut file = OpenOptions::new().create(true).append(true).open(full)?;
                file.write_all(body.as_bytes())?;
                Ok(format!("Content appended to: {rel}"))
            }
            "delete" => {
                if full.is_file() {
                    fs::remove_file(full)?;
                    Ok(format!("File deleted: {rel}"))
                } else {
                    Err(format!("File not found: {rel}"))
                }
            }
            "patch" => {
                if !full.is_file() {
                    return Ok(Err(format!("File not found: {rel}")));
                }
                let blocks = parse_patch(body);
                if blocks.is_empty() {
                    return Ok(Err(format!("No {SEARCH_MARKER} blocks in patch for: {rel}")));
                }

                let mut content = fs::read_to_string(full)?;
                let mut applied = 0;
                for block in &blocks {
                    if !block.search.is_empty() && content.contains(&block.search) {
                        content = content.replacen(&block.search, &block.replace, 1);
                        applied += 1;
                    }
                }

                if applied == 0 {
                    Err(format!("Patch did not match any text in: {rel}"))
                } else {
                    fs::write(full, content)?;
                    Ok(format!("Patch applied to: {rel} ({applied}/{} blocks)", blocks.len()))
                }
            }
            other => Err(format!("Unknown operation: {other}")),
        };
        Ok(outcome)
    }
}

impl Extension for FileEditExtension {
    fn name(&self) -> &str {
        "file_edit"
    }

    fn can_handle(&self, action: &Action) -> bool {
        action.kind == ActionKind::FileEdit
    }

    fn execute(&self, action: &mut Action, _ctx: &mut RunContext) -> Result<(), ExtensionError> {
        let rel = action.attribute("path").unwrap_or_default().trim().to_string();
        let full = match self.workspace.resolve(&rel) {
            Ok(full) => full,
            Err(e) => {
                action.set_error(e.to_string());
                return Ok(());
            }
        };
        let operation = action.attribute("operation").unwrap_or("write").to_string();

        debug!(path = %rel, operation = %operation, "Editing file");

        match self.apply(&operation, &rel, &full, &action.content) {
            Ok(Ok(message)) => action.set_result(message),
            Ok(Err(message)) => action.set_error(message),
            Err(e) => action.set_error(format!("File operation failed: {e}")),
        }
        Ok(())
    }
}
