//! Actions parsed from model output.
//!
//! An action is one directive (run a command, edit a file, ...) extracted
//! from a single LLM response. Extensions execute actions and record either
//! a result or an error on them.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Free-form key/value attributes carried by actions and messages.
pub type Attributes = serde_json::Map<String, Value>;

/// The closed set of action kinds the orchestrator understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    /// A shell command (`<bash>...</bash>`).
    #[serde(rename = "bash")]
    BashCommand,
    /// A file write/patch (`<file_edit path="...">...</file_edit>`).
    FileEdit,
    /// A file read (`<file_read>...</file_read>`).
    FileRead,
    /// A workspace search (`<search pattern="..."/>`).
    FileSearch,
    /// Free-form reasoning (`<thinking>...</thinking>`).
    Thinking,
    /// Synthetic action emitted when a completion phrase is detected.
    Completion,
}

impl ActionKind {
    /// All kinds, in parser order.
    pub const ALL: [ActionKind; 6] = [
        ActionKind::BashCommand,
        ActionKind::FileEdit,
        ActionKind::FileRead,
        ActionKind::FileSearch,
        ActionKind::Thinking,
        ActionKind::Completion,
    ];

    /// Returns the wire name of this kind.
    pub fn as_str(self) -> &'static str {
        match self {
            ActionKind::BashCommand => "bash",
            ActionKind::FileEdit => "file_edit",
            ActionKind::FileRead => "file_read",
            ActionKind::FileSearch => "file_search",
            ActionKind::Thinking => "thinking",
            ActionKind::Completion => "completion",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One unit of work extracted from model output.
///
/// The executing extension sets exactly one of `result` or `error`; the
/// setters enforce this by clearing the other field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    /// What kind of action this is.
    pub kind: ActionKind,

    /// The body of the tagged span (trimmed).
    pub content: String,

    /// Attributes parsed from the opening tag (`path`, `pattern`, ...).
    #[serde(default)]
    pub attributes: Attributes,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    result: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl Action {
    /// Creates a new unexecuted action.
    pub fn new(kind: ActionKind, content: impl Into<String>) -> Self {
        Self {
            kind,
            content: content.into(),
            attributes: Attributes::new(),
            result: None,
            error: None,
        }
    }

    /// Adds a string attribute.
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes
            .insert(key.into(), Value::String(value.into()));
        self
    }

    /// Returns a string attribute, if present.
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).and_then(Value::as_str)
    }

    /// Records a successful result, clearing any previous error.
    pub fn set_result(&mut self, result: impl Into<String>) {
        self.result = Some(result.into());
        self.error = None;
    }

    /// Records a failure, clearing any previous result.
    pub fn set_error(&mut self, error: impl Into<String>) {
        self.error = Some(error.into());
        self.result = None;
    }

    pub fn result(&self) -> Option<&str> {
        self.result.as_deref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// True once an extension has recorded a result and no error.
    pub fn succeeded(&self) -> bool {
        self.result.is_some() && self.error.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setters_are_mutually_exclusive() {
        let mut action = Action::new(ActionKind::BashCommand, "ls");

        action.set_result("a.txt");
        assert_eq!(action.result(), Some("a.txt"));
        assert!(action.error().is_none());
        assert!(action.succeeded());

        action.set_error("boom");
        assert!(action.result().is_none());
        assert_eq!(action.error(), Some("boom"));
        assert!(!action.succeeded());
    }

    #[test]
    fn test_attribute_lookup() {
        let action = Action::new(ActionKind::FileEdit, "body").with_attribute("path", "src/a.rs");
        assert_eq!(action.attribute("path"), Some("src/a.rs"));
        assert_eq!(action.attribute("missing"), None);
    }

    #[test]
    fn test_kind_serializes_to_wire_name() {
        for kind in ActionKind::ALL {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.as_str()));
        }
    }
}
