use confucius_core::{Extension, ExtensionError, RunContext};
use confucius_proto::{Action, Message, Role};
use serde_json::json;
use tracing::debug;

/// System messages at least this long are marked cacheable.
pub const CACHE_MIN_CHARS: usize = 1000;

/// Adds provider cache hints to long system messages.
///
/// Only the `anthropic` provider is understood; the hint is an ephemeral
/// `cache_control` attribute that request builders can pass through.
#[derive(Debug, Clone)]
pub struct PromptCacheExtension {
    provider: String,
}

impl Default for PromptCacheExtension {
    fn default() -> Self {
        Self::new("anthropic")
    }
}

impl PromptCacheExtension {
    pub fn new(provider: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
        }
    }
}

impl Extension for PromptCacheExtension {
    fn name(&self) -> &str {
        "prompt_cache"
    }

    fn can_handle(&self, _action: &Action) -> bool {
        false
    }

    fn execute(&self, _action: &mut Action, _ctx: &mut RunContext) -> Result<(), ExtensionError> {
        Ok(())
    }

    fn on_input_messages(&self, mut messages: Vec<Message>, _ctx: &mut RunContext) -> Vec<Message> {
        if self.provider != "anthropic" {
            return messages;
        }

        for message in &mut messages {
            if message.role == Role::System && message.content.chars().count() > CACHE_MIN_CHARS {
                message
                    .attributes
                    .insert("cache_control".to_string(), json!({"type": "ephemeral"}));
            }
        }
        debug!(provider = %self.provider, "Applied prompt cache hints");
        messages
    }
}
