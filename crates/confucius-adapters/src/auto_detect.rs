//! Picks an installed AI CLI when the configured backend is `auto`.

use std::process::{Command, Stdio};
use std::sync::OnceLock;
use tracing::debug;

/// Default priority order for backend detection.
pub const DEFAULT_PRIORITY: &[&str] = &["claude", "kiro", "gemini", "codex", "amp"];

/// First successful detection, reused for the rest of the process.
static DETECTED_BACKEND: OnceLock<String> = OnceLock::new();

/// No backend in the priority list is installed.
#[derive(Debug, Clone, thiserror::Error)]
#[error("no supported AI backend found in PATH (checked: {})", .checked.join(", "))]
pub struct NoBackendError {
    /// Backends that were probed.
    pub checked: Vec<String>,
}

/// Executable probed for a backend name.
pub fn backend_command(backend: &str) -> &str {
    match backend {
        "kiro" => "kiro-cli",
        other => other,
    }
}

/// Runs `<command> --version` and reports whether it exited 0.
pub fn is_backend_available(backend: &str) -> bool {
    let command = backend_command(backend);
    let result = Command::new(command)
        .arg("--version")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();

    let available = result.is_ok_and(|status| status.success());
    debug!(backend, command, available, "Backend availability check");
    available
}

/// Returns the first available backend in `priority` for which
/// `adapter_enabled` holds.
pub fn detect_backend<F>(priority: &[&str], adapter_enabled: F) -> Result<String, NoBackendError>
where
    F: Fn(&str) -> bool,
{
    debug!(priority = ?priority, "Starting backend auto-detection");

    if let Some(cached) = DETECTED_BACKEND.get()
        && priority.contains(&cached.as_str())
        && adapter_enabled(cached)
    {
        debug!(backend = %cached, "Using cached backend detection result");
        return Ok(cached.clone());
    }

    let mut checked = Vec::new();
    for &backend in priority {
        if !adapter_enabled(backend) {
            debug!(backend, "Skipping disabled adapter");
            continue;
        }

        checked.push(backend.to_string());

        if is_backend_available(backend) {
            debug!(backend, "Backend detected and selected");
            let _ = DETECTED_BACKEND.set(backend.to_string());
            return Ok(backend.to_string());
        }
    }

    debug!(checked = ?checked, "No backends available");
    Err(NoBackendError { checked })
}

/// Detects a backend using the default priority with every adapter enabled.
pub fn detect_backend_default() -> Result<String, NoBackendError> {
    detect_backend(DEFAULT_PRIORITY, |_| true)
}
