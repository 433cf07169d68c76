//! The model-calling interface.

use crate::error::LlmError;
use crate::message::Message;

/// Anything that can turn a conversation into the next assistant reply.
///
/// Provider adapters and test doubles implement this. Plain closures with
/// the right signature implement it too, which keeps ad-hoc callers short:
///
/// ```
/// use confucius_proto::{LlmClient, LlmError, Message};
///
/// let echo = |messages: &[Message]| -> Result<String, LlmError> {
///     Ok(messages.last().map(|m| m.content.clone()).unwrap_or_default())
/// };
/// let reply = echo.complete(&[Message::user("hi")]).unwrap();
/// assert_eq!(reply, "hi");
/// ```
pub trait LlmClient: Send + Sync {
    /// Returns the model's reply to `messages`.
    ///
    /// Timeouts are the implementation's responsibility; the orchestrator
    /// blocks on this call.
    fn complete(&self, messages: &[Message]) -> Result<String, LlmError>;
}

impl<F> LlmClient for F
where
    F: Fn(&[Message]) -> Result<String, LlmError> + Send + Sync,
{
    fn complete(&self, messages: &[Message]) -> Result<String, LlmError> {
        self(messages)
    }
}
