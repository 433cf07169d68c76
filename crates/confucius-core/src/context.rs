//! Per-run shared state handed to extensions.

use crate::memory::MemoryManager;
use confucius_proto::Attributes;
use serde_json::Value;
use std::collections::BTreeMap;

/// State shared by the orchestrator and its extensions for one run.
///
/// Artifacts are the side channel extensions use to pass data to each other
/// and to the caller; attributes hold loop bookkeeping such as the current
/// iteration.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub session_id: String,

    /// Nesting level: 0 for the top-level run, parent depth + 1 for subagents.
    pub depth: u32,

    /// Call index of the subagent spawn that created this context, if any.
    pub parent_call: Option<usize>,

    pub memory: MemoryManager,

    pub artifacts: BTreeMap<String, Value>,

    pub attributes: Attributes,
}

impl RunContext {
    /// Creates a top-level context.
    pub fn new(session_id: impl Into<String>, memory: MemoryManager) -> Self {
        Self {
            session_id: session_id.into(),
            depth: 0,
            parent_call: None,
            memory,
            artifacts: BTreeMap::new(),
            attributes: Attributes::new(),
        }
    }

    /// Creates an isolated child context with fresh memory.
    pub fn child(&self, session_id: impl Into<String>, memory: MemoryManager, call_index: usize) -> Self {
        Self {
            session_id: session_id.into(),
            depth: self.depth + 1,
            parent_call: Some(call_index),
            memory,
            artifacts: BTreeMap::new(),
            attributes: Attributes::new(),
        }
    }

    pub fn artifact(&self, key: &str) -> Option<&Value> {
        self.artifacts.get(key)
    }

    pub fn set_artifact(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.artifacts.insert(key.into(), value.into());
    }

    pub fn attribute(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }

    pub fn set_attribute(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.attributes.insert(key.into(), value.into());
    }

    /// Iteration number of the enclosing orchestrator loop (1-indexed, 0 before the first).
    pub fn current_iteration(&self) -> u32 {
        self.attributes
            .get("current_iteration")
            .and_then(Value::as_u64)
            .map_or(0, |n| n as u32)
    }
}
