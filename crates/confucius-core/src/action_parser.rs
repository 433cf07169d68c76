//! Action parsing from model output.
//!
//! Recognizes one tagged span per action kind:
//! ```text
//! <bash>cargo test</bash>
//! <file_edit path="src/lib.rs">...</file_edit>
//! <file_read>README.md</file_read>
//! <search pattern="*.toml">
//! <thinking>...</thinking>
//! ```
//! and appends a synthetic completion action when the text contains a
//! completion phrase.

use crate::tags::{TagMatch, scan_openings, scan_paired};
use confucius_proto::{Action, ActionKind};

/// Phrases that signal the model considers the task done.
///
/// Matched case-insensitively anywhere in the output, both by the parser and
/// by the orchestrator's post-action completion check.
pub const COMPLETION_PHRASES: &[&str] = &[
    "task complete",
    "finished",
    "done with task",
    "done with all steps",
    "no further actions needed",
];

/// Parser for extracting actions from model output.
#[derive(Debug, Clone)]
pub struct ActionParser {
    completion_phrases: Vec<String>,
}

impl Default for ActionParser {
    fn default() -> Self {
        Self {
            completion_phrases: COMPLETION_PHRASES.iter().map(|p| p.to_string()).collect(),
        }
    }
}

impl ActionParser {
    /// Creates a parser with the default completion phrases.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the completion phrase set. Phrases are lowercased.
    pub fn with_completion_phrases<I, S>(mut self, phrases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.completion_phrases = phrases
            .into_iter()
            .map(|p| p.into().to_lowercase())
            .collect();
        self
    }

    /// Parses actions from model output in source order.
    ///
    /// Never fails; unrecognized or malformed tags are ignored. An empty
    /// result means the model produced free text with no directives.
    pub fn parse(&self, output: &str) -> Vec<Action> {
        let mut positioned: Vec<(usize, Action)> = Vec::new();

        for m in scan_paired(output, "bash") {
            positioned.push((m.span.start, body_action(ActionKind::BashCommand, &m)));
        }

        for m in scan_paired(output, "file_edit") {
            // A file edit without a target path is not an edit
            if m.attr("path").is_none() {
                continue;
            }
            positioned.push((m.span.start, body_action(ActionKind::FileEdit, &m)));
        }

        for m in scan_paired(output, "file_read") {
            positioned.push((m.span.start, body_action(ActionKind::FileRead, &m)));
        }

        for m in scan_openings(output, "search") {
            let Some(pattern) = m.attr("pattern") else {
                continue;
            };
            let mut action = Action::new(ActionKind::FileSearch, pattern);
            action.attributes = m.attributes.clone();
            positioned.push((m.span.start, action));
        }

        for m in scan_paired(output, "thinking") {
            positioned.push((m.span.start, body_action(ActionKind::Thinking, &m)));
        }

        // Stable sort keeps same-offset matches in kind order
        positioned.sort_by_key(|(start, _)| *start);
        let mut actions: Vec<Action> = positioned.into_iter().map(|(_, a)| a).collect();

        if self.has_completion_phrase(output) {
            actions.push(Action::new(ActionKind::Completion, output));
        }

        actions
    }

    /// Returns true if the output contains any completion phrase.
    pub fn has_completion_phrase(&self, output: &str) -> bool {
        let lower = output.to_lowercase();
        self.completion_phrases
            .iter()
            .any(|phrase| lower.contains(phrase.as_str()))
    }
}

fn body_action(kind: ActionKind, m: &TagMatch) -> Action {
    let mut action = Action::new(kind, m.body.trim());
    action.attributes = m.attributes.clone();
    action
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_tags_no_phrase_is_empty() {
        let parser = ActionParser::new();
        assert!(parser.parse("I am thinking about the problem.").is_empty());
        assert!(parser.parse("").is_empty());
    }

    #[test]
    fn test_single_bash_span_is_trimmed() {
        let parser = ActionParser::new();
        let actions = parser.parse("Let me look.\n<bash>\n  ls -la  \n</bash>");

        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].kind, ActionKind::BashCommand);
        assert_eq!(actions[0].content, "ls -la");
    }

    #[test]
    fn test_file_edit_carries_path() {
        let parser = ActionParser::new();
        let actions = parser.parse(r#"<file_edit path="src/main.rs">fn main() {}</file_edit>"#);

        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].kind, ActionKind::FileEdit);
        assert_eq!(actions[0].attribute("path"), Some("src/main.rs"));
        assert_eq!(actions[0].content, "fn main() {}");
    }

    #[test]
    fn test_file_edit_without_path_is_ignored() {
        let parser = ActionParser::new();
        assert!(parser.parse("<file_edit>orphan</file_edit>").is_empty());
    }

    #[test]
    fn test_search_uses_pattern_as_content() {
        let parser = ActionParser::new();
        let actions = parser.parse(r#"<search pattern="*.toml" search_type="filename">"#);

        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].kind, ActionKind::FileSearch);
        assert_eq!(actions[0].content, "*.toml");
        assert_eq!(actions[0].attribute("search_type"), Some("filename"));
    }

    #[test]
    fn test_mixed_kinds_preserve_source_order() {
        let parser = ActionParser::new();
        let output = r#"
<thinking>plan first</thinking>
<file_read>Cargo.toml</file_read>
<bash>cargo build</bash>
<file_read>README.md</file_read>
"#;
        let kinds: Vec<_> = parser.parse(output).iter().map(|a| a.kind).collect();

        assert_eq!(
            kinds,
            vec![
                ActionKind::Thinking,
                ActionKind::FileRead,
                ActionKind::BashCommand,
                ActionKind::FileRead,
            ]
        );
    }

    #[test]
    fn test_completion_phrase_appends_completion_action() {
        let parser = ActionParser::new();
        let output = "<bash>echo ok</bash>\nTask Complete!";
        let actions = parser.parse(output);

        assert_eq!(actions.len(), 2);
        assert_eq!(actions[1].kind, ActionKind::Completion);
        assert_eq!(actions[1].content, output);
    }

    #[test]
    fn test_completion_phrase_is_case_insensitive() {
        let parser = ActionParser::new();
        assert!(parser.has_completion_phrase("All DONE WITH ALL STEPS."));
        assert!(parser.has_completion_phrase("No further actions needed"));
        assert!(!parser.has_completion_phrase("Working... (iteration 2)"));
    }

    #[test]
    fn test_malformed_input_never_panics() {
        let parser = ActionParser::new();
        for input in [
            "<bash>",
            "</bash><bash",
            "<file_edit path=\"x",
            "<search pattern=>",
            "<<<>>>",
            "<thinking>ünïcödé</thinking>",
        ] {
            let _ = parser.parse(input);
        }
    }

    #[test]
    fn test_custom_completion_phrases() {
        let parser = ActionParser::new().with_completion_phrases(["ALL GREEN"]);
        assert!(parser.has_completion_phrase("status: all green"));
        assert!(!parser.has_completion_phrase("task complete"));
    }
}
