//! # confucius-adapters
//!
//! Concrete tools and model backends for the Confucius Agent framework.
//!
//! This crate provides:
//! - Built-in extensions: shell, file edit/read/search, thinking, planning
//!   and prompt-cache hints
//! - A subprocess runner with timeouts shared by the shell extension and
//!   the model backends
//! - `CliLlm`, an `LlmClient` that drives a headless AI CLI
//!   (Claude, Kiro, Gemini, Codex, Amp, or a custom command)
//! - The `coding_agent` factory that wires everything from an `AgentConfig`
//!
//! ## Auto-Detection
//!
//! When config specifies `backend: auto`, the `auto_detect` module picks the
//! first CLI in the priority list that answers `--version`.

mod agent;
mod auto_detect;
mod cli_backend;
pub mod extensions;
pub mod process;
mod workspace;

pub use agent::{CodingAgent, coding_agent, coding_agent_with_cancel, coding_system_prompt, default_extensions};
pub use auto_detect::{
    DEFAULT_PRIORITY, NoBackendError, backend_command, detect_backend, detect_backend_default,
    is_backend_available,
};
pub use cli_backend::{
    BackendError, CliBackend, CliLlm, CustomBackendError, PreparedCommand, PromptMode, flatten_transcript,
};
pub use extensions::{
    BashExtension, FileEditExtension, FileReadExtension, FileSearchExtension, PlanningExtension,
    PromptCacheExtension, ThinkingExtension,
};
pub use workspace::{Workspace, WorkspaceError};
