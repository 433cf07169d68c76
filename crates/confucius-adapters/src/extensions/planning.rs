use confucius_core::{Extension, ExtensionError, RunContext};
use confucius_proto::{Action, Message, Role};

pub const PLANNING_GUIDANCE: &str = "Before taking action:\n\
1. Break down the task into steps\n\
2. Identify files/commands needed\n\
3. Consider potential errors\n\
4. Execute step by step\n";

/// Inserts planning guidance on the first turn of a conversation.
///
/// A conversation is on its first turn while it holds at most a system
/// prompt and the task. The guidance goes right after the leading system
/// message, or first when there is none.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlanningExtension;

impl PlanningExtension {
    pub fn new() -> Self {
        Self
    }
}

impl Extension for PlanningExtension {
    fn name(&self) -> &str {
        "planning"
    }

    fn can_handle(&self, _action: &Action) -> bool {
        false
    }

    fn execute(&self, _action: &mut Action, _ctx: &mut RunContext) -> Result<(), ExtensionError> {
        Ok(())
    }

    fn on_input_messages(&self, mut messages: Vec<Message>, _ctx: &mut RunContext) -> Vec<Message> {
        if messages.len() <= 2 && messages.iter().all(|m| m.role != Role::Assistant) {
            let at = usize::from(messages.first().is_some_and(|m| m.role == Role::System));
            messages.insert(at, Message::system(PLANNING_GUIDANCE));
        }
        messages
    }
}
