//! Extension contract and dispatch.
//!
//! An extension claims a subset of action kinds through `can_handle` and
//! may also reshape the conversation through two hooks that run for every
//! registered extension, claimed or not:
//! - `on_input_messages` before each model call
//! - `on_llm_output` after each model call, before parsing

use crate::context::RunContext;
use confucius_proto::{Action, LlmError, Message};
use std::sync::Arc;
use tracing::{debug, warn};

/// Failure raised by an extension while executing an action.
///
/// The orchestrator records these on the action instead of aborting the run.
#[derive(Debug, thiserror::Error)]
pub enum ExtensionError {
    #[error("{0}")]
    Failed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Llm(#[from] LlmError),
}

impl ExtensionError {
    pub fn failed(message: impl Into<String>) -> Self {
        ExtensionError::Failed(message.into())
    }
}

/// A capability-scoped action handler.
pub trait Extension: Send + Sync {
    /// Short identifier used in logs and error messages.
    fn name(&self) -> &str;

    /// Whether this extension executes `action`.
    fn can_handle(&self, action: &Action) -> bool;

    /// Executes `action`, recording a result or error on it.
    ///
    /// Expected failures (missing file, blocked command) belong on the
    /// action via `set_error`. A returned `Err` is converted by the
    /// dispatcher into the same shape.
    fn execute(&self, action: &mut Action, ctx: &mut RunContext) -> Result<(), ExtensionError>;

    /// Rewrites the outbound message list before a model call.
    fn on_input_messages(&self, messages: Vec<Message>, _ctx: &mut RunContext) -> Vec<Message> {
        messages
    }

    /// Rewrites raw model output before it is parsed.
    fn on_llm_output(&self, output: String, _ctx: &mut RunContext) -> String {
        output
    }

    /// True for extensions that spawn nested runs; these are left out of
    /// the extension list handed to a subagent.
    fn delegates(&self) -> bool {
        false
    }
}

/// Ordered extension list shared between runs.
pub type ExtensionList = Vec<Arc<dyn Extension>>;

/// Routes `action` to the first extension that claims it.
///
/// Returns the name of the handling extension, or `None` if the action was
/// unroutable (in which case the action carries an error).
pub fn dispatch(extensions: &[Arc<dyn Extension>], action: &mut Action, ctx: &mut RunContext) -> Option<String> {
    let Some(ext) = extensions.iter().find(|ext| ext.can_handle(action)) else {
        let message = format!("no extension found for {}", action.kind);
        warn!(kind = %action.kind, "{}", message);
        action.set_error(message);
        return None;
    };

    debug!(extension = ext.name(), kind = %action.kind, "Dispatching action");

    if let Err(e) = ext.execute(action, ctx) {
        warn!(extension = ext.name(), error = %e, "Extension failed");
        action.set_error(format!("extension '{}' failed: {}", ext.name(), e));
    } else if action.result().is_none() && action.error().is_none() {
        // Extensions must report something; treat silence as an empty result
        action.set_result(String::new());
    }

    Some(ext.name().to_string())
}

/// Applies every extension's `on_input_messages` hook in registration order.
pub fn apply_input_hooks(
    extensions: &[Arc<dyn Extension>],
    messages: Vec<Message>,
    ctx: &mut RunContext,
) -> Vec<Message> {
    extensions
        .iter()
        .fold(messages, |acc, ext| ext.on_input_messages(acc, ctx))
}

/// Applies every extension's `on_llm_output` hook in registration order.
pub fn apply_output_hooks(extensions: &[Arc<dyn Extension>], output: String, ctx: &mut RunContext) -> String {
    extensions
        .iter()
        .fold(output, |acc, ext| ext.on_llm_output(acc, ctx))
}
