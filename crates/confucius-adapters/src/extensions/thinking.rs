use confucius_core::{Extension, ExtensionError, RunContext};
use confucius_proto::{Action, ActionKind};
use serde_json::Value;

/// Logs `<thinking>` spans to the `thoughts` context attribute.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThinkingExtension;

impl ThinkingExtension {
    pub fn new() -> Self {
        Self
    }
}

impl Extension for ThinkingExtension {
    fn name(&self) -> &str {
        "thinking"
    }

    fn can_handle(&self, action: &Action) -> bool {
        action.kind == ActionKind::Thinking
    }

    fn execute(&self, action: &mut Action, ctx: &mut RunContext) -> Result<(), ExtensionError> {
        let mut thoughts = match ctx.attribute("thoughts") {
            Some(Value::Array(existing)) => existing.clone(),
            _ => Vec::new(),
        };
        thoughts.push(Value::String(action.content.clone()));
        ctx.set_attribute("thoughts", Value::Array(thoughts));

        action.set_result("[Thinking logged]");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use confucius_core::MemoryManager;

    #[test]
    fn test_thoughts_accumulate() {
        let ext = ThinkingExtension::new();
        let mut ctx = RunContext::new("think", MemoryManager::default());

        for thought in ["first", "second"] {
            let mut action = Action::new(ActionKind::Thinking, thought);
            ext.execute(&mut action, &mut ctx).unwrap();
            assert_eq!(action.result(), Some("[Thinking logged]"));
        }

        assert_eq!(ctx.attribute("thoughts").unwrap(), &serde_json::json!(["first", "second"]));
    }
}
