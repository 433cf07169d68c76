//! Scripted LLM client for tests and offline demos.

use confucius_proto::{LlmClient, LlmError, Message};
use std::sync::{Arc, Mutex};

/// Deterministic `LlmClient` that replays scripted responses.
///
/// Responses cycle: call `n` returns `responses[n % len]`. With no scripted
/// responses a keyword-based default is generated from the last message.
/// Every call's message list is recorded. Clones share the script position
/// and history.
#[derive(Debug, Clone, Default)]
pub struct MockLlm {
    responses: Arc<Vec<String>>,
    calls: Arc<Mutex<Vec<Vec<Message>>>>,
}

impl MockLlm {
    pub fn new(responses: Vec<String>) -> Self {
        Self {
            responses: Arc::new(responses),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Number of completed calls.
    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|c| c.len()).unwrap_or(0)
    }

    /// Message lists received, one per call.
    pub fn calls(&self) -> Vec<Vec<Message>> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    fn default_response(messages: &[Message]) -> String {
        let last = messages
            .last()
            .map(|m| m.content.to_lowercase())
            .unwrap_or_default();

        if last.contains("test") {
            "<bash>cargo test</bash>\n\nRunning tests...".to_string()
        } else if last.contains("read") || last.contains("file") {
            "<file_read>README.md</file_read>\n\nReading file...".to_string()
        } else if last.contains("fix") || last.contains("bug") {
            "<thinking>Analyzing the issue...</thinking>\n\n<bash>git status</bash>".to_string()
        } else {
            "TASK_COMPLETE\n\nTask completed successfully.".to_string()
        }
    }
}

impl LlmClient for MockLlm {
    fn complete(&self, messages: &[Message]) -> Result<String, LlmError> {
        let mut calls = self
            .calls
            .lock()
            .map_err(|_| LlmError::backend("mock call history poisoned"))?;
        let index = calls.len();
        calls.push(messages.to_vec());

        if self.responses.is_empty() {
            return Ok(Self::default_response(messages));
        }
        Ok(self.responses[index % self.responses.len()].clone())
    }
}
