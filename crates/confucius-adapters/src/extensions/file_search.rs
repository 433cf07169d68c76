use crate::workspace::Workspace;
use confucius_core::{Extension, ExtensionError, RunContext};
use confucius_proto::{Action, ActionKind};
use ignore::WalkBuilder;
use regex::Regex;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Matches listed in a search result; the count line still reports all.
pub const MAX_SEARCH_RESULTS: usize = 20;

/// Handles `<search pattern="..." search_type="filename|content">`.
///
/// Filename searches match a glob against the file name, or against the
/// workspace-relative path when the pattern contains `/`. Content searches
/// match a literal (or, with `is_regex="true"`, a regex) line by line and
/// can be narrowed with an `include` glob. `.gitignore` rules apply.
#[derive(Debug, Clone)]
pub struct FileSearchExtension {
    workspace: Workspace,
}

impl FileSearchExtension {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            workspace: Workspace::new(root),
        }
    }

    fn files(&self) -> Vec<PathBuf> {
        let mut walker = WalkBuilder::new(self.workspace.root());
        walker
            .hidden(false)
            .git_ignore(true)
            .filter_entry(|entry| entry.file_name() != ".git");

        let mut files: Vec<PathBuf> = walker
            .build()
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().is_some_and(|t| t.is_file()))
            .map(ignore::DirEntry::into_path)
            .collect();
        files.sort();
        files
    }

    fn relative(&self, path: &Path) -> String {
        self.workspace.relative(path)
    }

    fn search_filenames(&self, pattern: &str) -> Result<Vec<String>, String> {
        let glob = glob::Pattern::new(pattern).map_err(|e| format!("Invalid pattern '{pattern}': {e}"))?;
        let by_path = pattern.contains('/');

        Ok(self
            .files()
            .into_iter()
            .map(|path| self.relative(&path))
            .filter(|rel| {
                if by_path {
                    glob.matches(rel)
                } else {
                    let name = rel.rsplit('/').next().unwrap_or(rel);
                    glob.matches(name)
                }
            })
            .collect())
    }

    fn search_content(&self, pattern: &str, is_regex: bool, include: Option<&str>) -> Result<Vec<String>, String> {
        let regex = if is_regex {
            Regex::new(pattern)
        } else {
            Regex::new(&regex::escape(pattern))
        }
        .map_err(|e| format!("Invalid pattern '{pattern}': {e}"))?;

        let include = include
            .map(glob::Pattern::new)
            .transpose()
            .map_err(|e| format!("Invalid include glob: {e}"))?;

        let mut matches = Vec::new();
        for path in self.files() {
            let rel = self.relative(&path);
            if let Some(ref include) = include {
                let name = rel.rsplit('/').next().unwrap_or(&rel);
                if !include.matches(name) && !include.matches(&rel) {
                    continue;
                }
            }

            // Binary and unreadable files are skipped
            let Ok(content) = std::fs::read_to_string(&path) else {
                continue;
            };
            for (line_num, line) in content.lines().enumerate() {
                if regex.is_match(line) {
                    matches.push(format!("{}:{}: {}", rel, line_num + 1, line.trim()));
                }
            }
        }
        Ok(matches)
    }
}

impl Extension for FileSearchExtension {
    fn name(&self) -> &str {
        "file_search"
    }

    fn can_handle(&self, action: &Action) -> bool {
        action.kind == ActionKind::FileSearch
    }

    fn execute(&self, action: &mut Action, _ctx: &mut RunContext) -> Result<(), ExtensionError> {
        let pattern = action
            .attribute("pattern")
            .unwrap_or(&action.content)
            .to_string();
        let search_type = action.attribute("search_type").unwrap_or("filename");

        let results = match search_type {
            "filename" => self.search_filenames(&pattern),
            "content" => {
                let is_regex = action.attribute("is_regex") == Some("true");
                self.search_content(&pattern, is_regex, action.attribute("include"))
            }
            other => Err(format!("Unknown search type: {other}")),
        };

        match results {
            Ok(results) if results.is_empty() => action.set_result("No matches found"),
            Ok(results) => {
                debug!(pattern = %pattern, matches = results.len(), "Search finished");
                let listed: Vec<&str> = results.iter().take(MAX_SEARCH_RESULTS).map(String::as_str).collect();
                action.set_result(format!("Found {} matches:\n{}", results.len(), listed.join("\n")));
            }
            Err(message) => action.set_error(message),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use confucius_core::MemoryManager;
    use std::fs;
    use tempfile::TempDir;

    fn fixture() -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("src/nested")).unwrap();
        fs::write(dir.path().join("Cargo.toml"), "[package]\nname = \"demo\"\n").unwrap();
        fs::write(dir.path().join("src/lib.rs"), "// TODO: docs\npub fn a() {}\n").unwrap();
        fs::write(dir.path().join("src/nested/util.rs"), "fn helper() {} // TODO\n").unwrap();
        fs::write(dir.path().join("README.md"), "TODO list\n").unwrap();
        dir
    }

    fn search(ext: &FileSearchExtension, attrs: &[(&str, &str)]) -> Action {
        let mut action = Action::new(ActionKind::FileSearch, attrs[0].1);
        for (key, value) in attrs {
            action = action.with_attribute(*key, *value);
        }
        let mut ctx = RunContext::new("search-test", MemoryManager::default());
        ext.execute(&mut action, &mut ctx).unwrap();
        action
    }

    #[test]
    fn test_filename_glob_matches_nested_files() {
        let dir = fixture();
        let ext = FileSearchExtension::new(dir.path());

        let action = search(&ext, &[("pattern", "*.rs")]);

        assert_eq!(action.result(), Some("Found 2 matches:\nsrc/lib.rs\nsrc/nested/util.rs"));
    }

    #[test]
    fn test_content_search_with_include() {
        let dir = fixture();
        let ext = FileSearchExtension::new(dir.path());

        let action = search(
            &ext,
            &[("pattern", "TODO"), ("search_type", "content"), ("include", "*.rs")],
        );

        let result = action.result().unwrap();
        assert!(result.starts_with("Found 2 matches:"));
        assert!(result.contains("src/lib.rs:1: // TODO: docs"));
        assert!(!result.contains("README.md"));
    }

    #[test]
    fn test_content_search_regex() {
        let dir = fixture();
        let ext = FileSearchExtension::new(dir.path());

        let action = search(
            &ext,
            &[("pattern", r"fn \w+\(\)"), ("search_type", "content"), ("is_regex", "true")],
        );

        assert!(action.result().unwrap().starts_with("Found 2 matches:"));
    }

    #[test]
    fn test_no_matches() {
        let dir = fixture();
        let ext = FileSearchExtension::new(dir.path());

        let action = search(&ext, &[("pattern", "*.py")]);

        assert_eq!(action.result(), Some("No matches found"));
    }

    #[test]
    fn test_results_capped() {
        let dir = TempDir::new().unwrap();
        for i in 0..30 {
            fs::write(dir.path().join(format!("f{i:02}.txt")), "").unwrap();
        }
        let ext = FileSearchExtension::new(dir.path());

        let action = search(&ext, &[("pattern", "*.txt")]);

        let result = action.result().unwrap();
        assert!(result.starts_with("Found 30 matches:"));
        assert_eq!(result.lines().count(), 1 + MAX_SEARCH_RESULTS);
    }

    #[test]
    fn test_unknown_search_type() {
        let dir = fixture();
        let ext = FileSearchExtension::new(dir.path());

        let action = search(&ext, &[("pattern", "x"), ("search_type", "semantic")]);

        assert_eq!(action.error(), Some("Unknown search type: semantic"));
    }
}
