//! Workspace root and path confinement for file extensions.

use std::path::{Component, Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum WorkspaceError {
    #[error("File path outside workspace: {0}")]
    OutsideWorkspace(String),

    #[error("No file path specified")]
    EmptyPath,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A directory that file actions may not escape.
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    /// Creates a workspace rooted at `root`, canonicalized when it exists.
    pub fn new(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        let root = root.canonicalize().unwrap_or_else(|_| normalize(root));
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolves a relative path against the root.
    ///
    /// `..` components are folded lexically; the result must stay under the
    /// root. If the deepest existing ancestor is a symlink leading outside
    /// the root, the path is rejected as well.
    pub fn resolve(&self, relative: &str) -> Result<PathBuf, WorkspaceError> {
        let trimmed = relative.trim();
        if trimmed.is_empty() {
            return Err(WorkspaceError::EmptyPath);
        }

        let joined = normalize(&self.root.join(trimmed));
        if !joined.starts_with(&self.root) {
            return Err(WorkspaceError::OutsideWorkspace(trimmed.to_string()));
        }

        let mut existing = joined.as_path();
        while !existing.exists() {
            match existing.parent() {
                Some(parent) => existing = parent,
                None => break,
            }
        }
        if existing.exists() && !existing.canonicalize()?.starts_with(&self.root) {
            return Err(WorkspaceError::OutsideWorkspace(trimmed.to_string()));
        }

        Ok(joined)
    }

    /// Path relative to the root, for display.
    pub fn relative(&self, path: &Path) -> String {
        path.strip_prefix(&self.root)
            .unwrap_or(path)
            .to_string_lossy()
            .into_owned()
    }
}

fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_resolves_inside_root() {
        let dir = TempDir::new().unwrap();
        let ws = Workspace::new(dir.path());

        let path = ws.resolve("src/./lib.rs").unwrap();
        assert_eq!(path, ws.root().join("src/lib.rs"));
        assert_eq!(ws.relative(&path), "src/lib.rs");
    }

    #[test]
    fn test_rejects_parent_escape() {
        let dir = TempDir::new().unwrap();
        let ws = Workspace::new(dir.path());

        assert!(matches!(
            ws.resolve("../secret.txt"),
            Err(WorkspaceError::OutsideWorkspace(_))
        ));
        assert!(ws.resolve("a/../../b").is_err());
        assert!(ws.resolve("a/../b").is_ok());
    }

    #[test]
    fn test_rejects_absolute_outside() {
        let dir = TempDir::new().unwrap();
        let ws = Workspace::new(dir.path());

        assert!(ws.resolve("/etc/passwd").is_err());
    }

    #[test]
    fn test_rejects_empty() {
        let dir = TempDir::new().unwrap();
        let ws = Workspace::new(dir.path());

        assert!(matches!(ws.resolve("  "), Err(WorkspaceError::EmptyPath)));
    }

    #[cfg(unix)]
    #[test]
    fn test_rejects_symlink_escape() {
        let outside = TempDir::new().unwrap();
        let dir = TempDir::new().unwrap();
        std::os::unix::fs::symlink(outside.path(), dir.path().join("link")).unwrap();
        let ws = Workspace::new(dir.path());

        assert!(ws.resolve("link/file.txt").is_err());
    }
}
