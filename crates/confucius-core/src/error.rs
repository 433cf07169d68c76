//! Crate-level error type.

use crate::config::ConfigError;
use crate::notes::NoteError;
use confucius_proto::LlmError;

/// Errors surfaced by orchestrator and Ralph loop runs.
///
/// Per-action failures never appear here; they are recorded on the action
/// and fed back to the model.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Note(#[from] NoteError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
