//! Hierarchical working memory with budget-driven compression.
//!
//! The manager holds the conversation in insertion order. After every
//! append it re-estimates the token count; once the estimate exceeds
//! `max_tokens * compression_threshold`, every message except the five most
//! recent is collapsed into one synthetic summary at the front.
//!
//! Alongside the message buffer sits a three-scope key/value hierarchy
//! (session, entry, runnable) for out-of-band state.

use crate::config::MemoryConfig;
use confucius_proto::{Message, Role};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

/// Number of most recent messages never touched by compression.
pub const KEEP_RECENT: usize = 5;

/// Prefix of every synthetic summary message.
pub const COMPRESSED_PREFIX: &str = "[COMPRESSED CONTEXT]";

const MAX_SUMMARY_ACTIONS: usize = 5;
const MAX_SUMMARY_ERRORS: usize = 3;

/// Strategy for estimating the token cost of messages.
///
/// Estimates only need to be monotonic in message length; the compression
/// policy never assumes exactness.
pub trait TokenEstimator: Send + Sync + fmt::Debug {
    /// Estimated tokens for a single piece of text.
    fn estimate(&self, text: &str) -> usize;

    /// Estimated tokens for a whole message sequence.
    fn estimate_messages(&self, messages: &[Message]) -> usize {
        messages.iter().map(|m| self.estimate(&m.content)).sum()
    }
}

/// Fixed characters-per-token ratio. The default is four.
#[derive(Debug, Clone, Copy)]
pub struct CharRatioEstimator {
    chars_per_token: usize,
}

impl CharRatioEstimator {
    pub fn new(chars_per_token: usize) -> Self {
        Self {
            chars_per_token: chars_per_token.max(1),
        }
    }
}

impl Default for CharRatioEstimator {
    fn default() -> Self {
        Self::new(4)
    }
}

impl TokenEstimator for CharRatioEstimator {
    fn estimate(&self, text: &str) -> usize {
        text.chars().count() / self.chars_per_token
    }

    fn estimate_messages(&self, messages: &[Message]) -> usize {
        let total: usize = messages.iter().map(|m| m.content.chars().count()).sum();
        total / self.chars_per_token
    }
}

/// Named scopes of the memory hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryScope {
    /// Lives for the whole session.
    Session,
    /// Lives for one task entry.
    Entry,
    /// Lives for one runnable step.
    Runnable,
}

/// Out-of-band key/value storage, independent of the message buffer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryHierarchy {
    pub session: BTreeMap<String, Value>,
    pub entry: BTreeMap<String, Value>,
    pub runnable: BTreeMap<String, Value>,
}

impl MemoryHierarchy {
    fn scope(&self, scope: MemoryScope) -> &BTreeMap<String, Value> {
        match scope {
            MemoryScope::Session => &self.session,
            MemoryScope::Entry => &self.entry,
            MemoryScope::Runnable => &self.runnable,
        }
    }

    fn scope_mut(&mut self, scope: MemoryScope) -> &mut BTreeMap<String, Value> {
        match scope {
            MemoryScope::Session => &mut self.session,
            MemoryScope::Entry => &mut self.entry,
            MemoryScope::Runnable => &mut self.runnable,
        }
    }
}

/// Bounded, hierarchical message buffer.
#[derive(Debug, Clone)]
pub struct MemoryManager {
    messages: Vec<Message>,
    max_tokens: usize,
    compression_threshold: f64,
    estimator: Arc<dyn TokenEstimator>,
    hierarchy: MemoryHierarchy,
    compressions: u32,
}

impl Default for MemoryManager {
    fn default() -> Self {
        Self::new(100_000, 0.8)
    }
}

impl MemoryManager {
    /// Creates an empty manager with the character-ratio estimator.
    pub fn new(max_tokens: usize, compression_threshold: f64) -> Self {
        Self {
            messages: Vec::new(),
            max_tokens,
            compression_threshold,
            estimator: Arc::new(CharRatioEstimator::default()),
            hierarchy: MemoryHierarchy::default(),
            compressions: 0,
        }
    }

    /// Creates an empty manager from configuration.
    pub fn from_config(config: &MemoryConfig) -> Self {
        Self::new(config.max_tokens, config.compression_threshold)
            .with_estimator(CharRatioEstimator::new(config.chars_per_token))
    }

    /// Replaces the token estimation strategy.
    pub fn with_estimator(mut self, estimator: impl TokenEstimator + 'static) -> Self {
        self.estimator = Arc::new(estimator);
        self
    }

    /// Appends a message, compressing the history if the budget is exceeded.
    ///
    /// Returns true if this append triggered a compression.
    pub fn add_message(&mut self, message: Message) -> bool {
        self.messages.push(message);

        let estimated = self.estimated_tokens();
        if (estimated as f64) > self.trigger_tokens() {
            return self.compress();
        }
        false
    }

    /// Shorthand for `add_message(Message::new(role, content))`.
    pub fn add(&mut self, role: Role, content: impl Into<String>) -> bool {
        self.add_message(Message::new(role, content))
    }

    /// Messages in conversation order.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Current token estimate for the whole buffer.
    pub fn estimated_tokens(&self) -> usize {
        self.estimator.estimate_messages(&self.messages)
    }

    /// Number of compressions performed so far.
    pub fn compression_count(&self) -> u32 {
        self.compressions
    }

    /// Number of messages currently flagged as compressed summaries.
    pub fn compressed_messages(&self) -> usize {
        self.messages.iter().filter(|m| m.compressed).count()
    }

    pub fn max_tokens(&self) -> usize {
        self.max_tokens
    }

    /// Stores a value in one scope of the hierarchy.
    pub fn store(&mut self, scope: MemoryScope, key: impl Into<String>, value: impl Into<Value>) {
        self.hierarchy
            .scope_mut(scope)
            .insert(key.into(), value.into());
    }

    /// Reads a value from one scope of the hierarchy.
    pub fn get(&self, scope: MemoryScope, key: &str) -> Option<&Value> {
        self.hierarchy.scope(scope).get(key)
    }

    pub fn hierarchy(&self) -> &MemoryHierarchy {
        &self.hierarchy
    }

    fn trigger_tokens(&self) -> f64 {
        self.max_tokens as f64 * self.compression_threshold
    }

    /// Collapses all but the last `KEEP_RECENT` messages into a summary.
    ///
    /// Skipped when there is nothing older than the recent window. An
    /// earlier summary in the older part is folded into the new one.
    fn compress(&mut self) -> bool {
        if self.messages.len() <= KEEP_RECENT {
            return false;
        }

        let split = self.messages.len() - KEEP_RECENT;
        let older: Vec<Message> = self.messages.drain(..split).collect();
        let summary = build_summary(&older);

        debug!(
            folded = summary.original_count,
            kept = self.messages.len(),
            "Compressing working memory"
        );

        let message = Message::assistant(format!("{COMPRESSED_PREFIX}\n{}", summary.render()))
            .with_attribute("compressed", true)
            .with_attribute("original_count", summary.original_count)
            .with_attribute("actions", json!(summary.actions))
            .with_attribute("errors", json!(summary.errors));
        let message = Message {
            compressed: true,
            ..message
        };

        self.messages.insert(0, message);
        self.compressions += 1;

        info!(
            compressions = self.compressions,
            estimated_tokens = self.estimated_tokens(),
            "Working memory compressed"
        );
        true
    }
}

/// Heuristic digest of a run of messages.
#[derive(Debug, Default)]
struct Summary {
    actions: Vec<String>,
    errors: Vec<String>,
    original_count: u64,
}

impl Summary {
    fn render(&self) -> String {
        let mut out = String::from("## Session Summary\n\n");
        if !self.actions.is_empty() {
            out.push_str("### Actions Taken:\n");
            for action in &self.actions {
                out.push_str(&format!("- {action}\n"));
            }
            out.push('\n');
        }
        if !self.errors.is_empty() {
            out.push_str("### Errors Encountered:\n");
            for error in &self.errors {
                out.push_str(&format!("- {error}\n"));
            }
            out.push('\n');
        }
        out
    }
}

fn build_summary(messages: &[Message]) -> Summary {
    let mut summary = Summary::default();

    for msg in messages {
        if msg.compressed {
            // Fold an earlier summary into this one
            summary.actions.extend(string_list(msg, "actions"));
            summary.errors.extend(string_list(msg, "errors"));
            summary.original_count += msg
                .attributes
                .get("original_count")
                .and_then(Value::as_u64)
                .unwrap_or(1);
            continue;
        }

        summary.original_count += 1;
        let lower = msg.content.to_lowercase();
        if msg.role == Role::Assistant && (lower.contains("bash") || lower.contains("file")) {
            summary.actions.push(prefix(&msg.content, 200));
        }
        if lower.contains("error") || lower.contains("failed") {
            summary.errors.push(prefix(&msg.content, 150));
        }
    }

    summary.actions.truncate(MAX_SUMMARY_ACTIONS);
    summary.errors.truncate(MAX_SUMMARY_ERRORS);
    summary
}

fn string_list(msg: &Message, key: &str) -> Vec<String> {
    msg.attributes
        .get(key)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn prefix(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_budget() -> MemoryManager {
        // 100 tokens * 0.8 => compress above 80 tokens (320 chars)
        MemoryManager::new(100, 0.8)
    }

    #[test]
    fn test_no_compression_under_budget() {
        let mut memory = small_budget();
        for i in 0..10 {
            assert!(!memory.add(Role::User, format!("msg {i}")));
        }
        assert_eq!(memory.len(), 10);
        assert_eq!(memory.compression_count(), 0);
    }

    #[test]
    fn test_compression_keeps_last_five_verbatim() {
        let mut memory = small_budget();
        let mut sent = Vec::new();
        let mut compressed = false;
        for i in 0..8 {
            let msg = Message::user(format!("{i}: {}", "x".repeat(60)));
            sent.push(msg.clone());
            compressed |= memory.add_message(msg);
        }

        assert!(compressed);
        let messages = memory.messages();
        assert!(messages[0].compressed);
        assert!(messages[0].content.starts_with(COMPRESSED_PREFIX));

        let tail = &messages[messages.len() - KEEP_RECENT..];
        assert_eq!(tail, &sent[sent.len() - KEEP_RECENT..]);
        assert!(tail.iter().all(|m| !m.compressed));
    }

    #[test]
    fn test_compression_records_original_count() {
        let mut memory = small_budget();
        for i in 0..6 {
            memory.add(Role::User, format!("{i}{}", "y".repeat(60)));
        }

        let summary = &memory.messages()[0];
        assert!(summary.compressed);
        assert_eq!(summary.role, Role::Assistant);
        assert_eq!(
            summary.attributes.get("original_count").and_then(Value::as_u64),
            Some(1)
        );
        assert_eq!(memory.len(), 1 + KEEP_RECENT);
    }

    #[test]
    fn test_compression_not_repeated_without_new_pressure() {
        let mut memory = small_budget();
        for i in 0..7 {
            memory.add(Role::User, format!("{i}{}", "z".repeat(60)));
        }
        let after_first = memory.compression_count();
        assert!(after_first >= 1);

        // Large enough to drop below the trigger once summarized
        let mut memory = MemoryManager::new(1000, 0.5);
        for i in 0..7 {
            memory.add(Role::User, format!("{i}{}", "w".repeat(300)));
        }
        let count = memory.compression_count();
        assert_eq!(count, 1);

        for _ in 0..3 {
            memory.add(Role::User, "ok");
        }
        assert_eq!(memory.compression_count(), count);
    }

    #[test]
    fn test_earlier_summary_folds_into_next() {
        // Recent messages alone exceed the budget
        let mut memory = MemoryManager::new(10, 1.0);
        for i in 0..6 {
            memory.add(Role::User, format!("{i}{}", "q".repeat(100)));
        }
        assert_eq!(memory.compression_count(), 1);
        assert_eq!(memory.len(), 1 + KEEP_RECENT);

        // Summary plus the oldest kept message become the new summary
        memory.add(Role::User, "r".repeat(100));
        assert_eq!(memory.compression_count(), 2);
        let summary = &memory.messages()[0];
        assert_eq!(
            summary.attributes.get("original_count").and_then(Value::as_u64),
            Some(2)
        );
    }

    #[test]
    fn test_fewer_than_six_messages_never_compress() {
        let mut memory = MemoryManager::new(1, 0.1);
        for _ in 0..KEEP_RECENT {
            assert!(!memory.add(Role::User, "a long enough message to exceed"));
        }
        assert_eq!(memory.compression_count(), 0);
    }

    #[test]
    fn test_summary_extracts_actions_and_errors() {
        let messages = vec![
            Message::assistant("<bash>cargo test</bash>"),
            Message::user("<error>build failed: missing semicolon</error>"),
            Message::assistant("Let me read the file"),
            Message::user("plain"),
        ];
        let summary = build_summary(&messages);

        assert_eq!(summary.actions.len(), 2);
        assert_eq!(summary.errors.len(), 1);
        assert_eq!(summary.original_count, 4);

        let rendered = summary.render();
        assert!(rendered.contains("### Actions Taken:"));
        assert!(rendered.contains("### Errors Encountered:"));
    }

    #[test]
    fn test_hierarchy_scopes_are_independent() {
        let mut memory = MemoryManager::default();
        memory.store(MemoryScope::Session, "task", "build");
        memory.store(MemoryScope::Runnable, "step", 3);

        assert_eq!(
            memory.get(MemoryScope::Session, "task"),
            Some(&Value::from("build"))
        );
        assert!(memory.get(MemoryScope::Entry, "task").is_none());
        assert_eq!(memory.hierarchy().runnable.len(), 1);
    }

    #[test]
    fn test_custom_estimator_is_used() {
        #[derive(Debug)]
        struct WordCount;
        impl TokenEstimator for WordCount {
            fn estimate(&self, text: &str) -> usize {
                text.split_whitespace().count()
            }
        }

        let mut memory = MemoryManager::new(10, 1.0).with_estimator(WordCount);
        memory.add(Role::User, "one two three");
        assert_eq!(memory.estimated_tokens(), 3);
    }
}
