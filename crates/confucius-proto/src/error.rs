//! Error types shared across crates.

use std::time::Duration;

/// Failure of a single model call.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("LLM call timed out after {0:?}")]
    Timeout(Duration),

    #[error("LLM backend error: {0}")]
    Backend(String),

    #[error("LLM call cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl LlmError {
    /// Creates a backend error from any displayable message.
    pub fn backend(message: impl Into<String>) -> Self {
        LlmError::Backend(message.into())
    }
}
