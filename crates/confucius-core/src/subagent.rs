//! Delegation to isolated, depth-bounded subagents.
//!
//! The model delegates a sub-task by emitting:
//! ```text
//! <subagent name="Scout">
//! List every public function in src/
//! </subagent>
//! ```
//! The extension intercepts these spans in `on_llm_output`, runs each one
//! through a fresh orchestrator (fresh memory, parent's extensions minus any
//! delegating extension, own iteration cap) and splices the child's output
//! back in place of the span:
//! ```text
//! <subagent_result name="Scout" call_index="0">
//! ...
//! </subagent_result>
//! ```

use crate::cancel::CancelToken;
use crate::config::{MemoryConfig, SubagentConfig};
use crate::context::RunContext;
use crate::error::Error;
use crate::extension::{Extension, ExtensionError, ExtensionList};
use crate::memory::MemoryManager;
use crate::orchestrator::Orchestrator;
use crate::tags::scan_paired;
use chrono::{DateTime, Utc};
use confucius_proto::{Action, LlmClient, LlmError};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::{info, warn};

const INPUT_SUMMARY_CHARS: usize = 150;
const OUTPUT_SUMMARY_CHARS: usize = 200;

/// Final status of one subagent spawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallStatus {
    /// Child run completed.
    Success,
    /// Child run ended without completing (iteration cap or cancellation).
    Failed,
    /// Child run raised an error.
    Error,
    /// Child model call timed out.
    Timeout,
}

impl CallStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CallStatus::Success => "success",
            CallStatus::Failed => "failed",
            CallStatus::Error => "error",
            CallStatus::Timeout => "timeout",
        }
    }
}

/// Trace record of one subagent spawn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubagentCall {
    pub name: String,
    pub input_summary: String,
    pub output_summary: String,
    pub full_output: String,
    pub timestamp: DateTime<Utc>,
    pub call_index: usize,
    /// Parent orchestrator iteration during which the call was made.
    pub iteration: u32,
    /// Depth of the child run.
    pub depth: u32,
    /// Action kinds the child executed.
    pub actions_taken: Vec<String>,
    /// Child run metadata (iterations, success, action count, or error).
    pub snapshot: serde_json::Value,
    pub status: CallStatus,
    pub duration_ms: u64,
}

/// Extension that spawns isolated child orchestrators.
pub struct SubagentExtension {
    llm: Arc<dyn LlmClient>,
    available: ExtensionList,
    max_depth: u32,
    max_iterations: u32,
    memory_config: MemoryConfig,
    cancel: CancelToken,
    live_depth: AtomicUsize,
    next_index: AtomicUsize,
    trace: Mutex<Vec<SubagentCall>>,
}

impl SubagentExtension {
    /// Creates the extension. Delegating extensions are dropped from
    /// `available` so children cannot spawn at the same level.
    pub fn new(llm: Arc<dyn LlmClient>, available: &[Arc<dyn Extension>]) -> Self {
        Self {
            llm,
            available: available
                .iter()
                .filter(|ext| !ext.delegates())
                .cloned()
                .collect(),
            max_depth: 2,
            max_iterations: 10,
            memory_config: MemoryConfig::default(),
            cancel: CancelToken::new(),
            live_depth: AtomicUsize::new(0),
            next_index: AtomicUsize::new(0),
            trace: Mutex::new(Vec::new()),
        }
    }

    pub fn with_config(mut self, config: &SubagentConfig) -> Self {
        self.max_depth = config.max_depth;
        self.max_iterations = config.max_iterations;
        self
    }

    pub fn with_max_depth(mut self, max_depth: u32) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Memory budget for each child's fresh memory.
    pub fn with_memory_config(mut self, config: MemoryConfig) -> Self {
        self.memory_config = config;
        self
    }

    /// Token shared with children so cancelling the parent stops them too.
    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn max_depth(&self) -> u32 {
        self.max_depth
    }

    /// Number of child runs currently in flight from this instance.
    pub fn live_depth(&self) -> usize {
        self.live_depth.load(Ordering::SeqCst)
    }

    /// Snapshot of all recorded calls.
    pub fn trace(&self) -> Vec<SubagentCall> {
        self.trace.lock().map(|t| t.clone()).unwrap_or_default()
    }

    /// Human-readable trace listing.
    pub fn trace_summary(&self) -> String {
        let calls = self.trace();
        if calls.is_empty() {
            return "No subagent calls recorded.".to_string();
        }

        let mut out = String::from("Subagent Trace:\n");
        out.push_str(&"=".repeat(70));
        for call in &calls {
            let _ = write!(
                out,
                "\n\n[{}] {}\n    Task: {}\n    Actions: {:?}\n    Output: {}\n    Timestamp: {}\n    Duration: {}ms\n    Status: {}",
                call.call_index,
                call.name,
                call.input_summary,
                call.actions_taken,
                call.output_summary,
                call.timestamp.to_rfc3339(),
                call.duration_ms,
                call.status.as_str(),
            );
        }
        out
    }

    /// Clears the trace and resets call numbering.
    pub fn clear_trace(&self) {
        if let Ok(mut trace) = self.trace.lock() {
            trace.clear();
        }
        self.next_index.store(0, Ordering::SeqCst);
    }

    fn depth_marker(&self) -> String {
        format!("[ERROR: Subagent depth limit reached ({})]", self.max_depth)
    }

    /// Runs one child orchestrator and records the call.
    fn spawn(&self, name: &str, task: &str, parent: &RunContext) -> SubagentCall {
        let call_index = self.next_index.fetch_add(1, Ordering::SeqCst);
        let timestamp = Utc::now();
        let started = Instant::now();
        let iteration = parent.current_iteration();

        let child_ctx = parent.child(
            format!("{}/{}#{}", parent.session_id, name, call_index),
            MemoryManager::from_config(&self.memory_config),
            call_index,
        );
        let depth = child_ctx.depth;

        info!(subagent = name, call_index, depth, "Spawning subagent");

        self.live_depth.fetch_add(1, Ordering::SeqCst);
        let outcome = {
            let _depth_guard = scopeguard::guard((), |()| {
                self.live_depth.fetch_sub(1, Ordering::SeqCst);
            });

            let mut child = Orchestrator::new(self.llm.clone(), self.available.clone())
                .with_context(child_ctx)
                .with_max_iterations(self.max_iterations)
                .with_system_prompt(format!("You are {name}, a specialized subagent."))
                .with_cancel_token(self.cancel.clone());
            child.run(task)
        };
        let duration_ms = started.elapsed().as_millis() as u64;

        let call = match outcome {
            Ok(result) => {
                let status = if result.success {
                    CallStatus::Success
                } else {
                    CallStatus::Failed
                };
                info!(
                    subagent = name,
                    status = status.as_str(),
                    iterations = result.iterations,
                    actions = result.actions.len(),
                    duration_ms,
                    "Subagent finished"
                );
                SubagentCall {
                    name: name.to_string(),
                    input_summary: truncate_chars(task, INPUT_SUMMARY_CHARS),
                    output_summary: truncate_chars(&result.final_output, OUTPUT_SUMMARY_CHARS),
                    actions_taken: result
                        .actions
                        .iter()
                        .map(|a| a.kind.as_str().to_string())
                        .collect(),
                    snapshot: json!({
                        "iterations": result.iterations,
                        "success": result.success,
                        "action_count": result.actions.len(),
                        "termination": result.termination.as_str(),
                    }),
                    full_output: result.final_output,
                    timestamp,
                    call_index,
                    iteration,
                    depth,
                    status,
                    duration_ms,
                }
            }
            Err(e) => {
                let status = match e {
                    Error::Llm(LlmError::Timeout(_)) => CallStatus::Timeout,
                    _ => CallStatus::Error,
                };
                let message = e.to_string();
                warn!(subagent = name, error = %message, "Subagent failed");
                SubagentCall {
                    name: name.to_string(),
                    input_summary: truncate_chars(task, INPUT_SUMMARY_CHARS),
                    output_summary: format!("ERROR: {}", truncate_chars(&message, 100)),
                    full_output: format!("Subagent failed with error: {message}"),
                    timestamp,
                    call_index,
                    iteration,
                    depth,
                    actions_taken: Vec::new(),
                    snapshot: json!({ "error": message }),
                    status,
                    duration_ms,
                }
            }
        };

        if let Ok(mut trace) = self.trace.lock() {
            trace.push(call.clone());
        }
        call
    }
}

impl Extension for SubagentExtension {
    fn name(&self) -> &str {
        "subagent"
    }

    fn can_handle(&self, _action: &Action) -> bool {
        false
    }

    fn execute(&self, _action: &mut Action, _ctx: &mut RunContext) -> Result<(), ExtensionError> {
        Ok(())
    }

    fn delegates(&self) -> bool {
        true
    }

    fn on_llm_output(&self, output: String, ctx: &mut RunContext) -> String {
        let spans: Vec<_> = scan_paired(&output, "subagent")
            .into_iter()
            .filter(|m| m.attr("name").is_some())
            .collect();
        if spans.is_empty() {
            return output;
        }

        let effective_depth = ctx.depth as usize + self.live_depth();
        let at_limit = effective_depth >= self.max_depth as usize;
        if at_limit {
            warn!(
                depth = effective_depth,
                max_depth = self.max_depth,
                rejected = spans.len(),
                "Subagent depth limit reached"
            );
        }

        let mut rewritten = String::with_capacity(output.len());
        let mut cursor = 0;
        for span in &spans {
            rewritten.push_str(&output[cursor..span.span.start]);
            cursor = span.span.end;

            if at_limit {
                rewritten.push_str(&self.depth_marker());
                continue;
            }

            let name = span.attr("name").unwrap_or_default();
            let call = self.spawn(name, span.body.trim(), ctx);
            let _ = write!(
                rewritten,
                "<subagent_result name=\"{}\" call_index=\"{}\">\n{}\n</subagent_result>",
                call.name, call.call_index, call.full_output
            );
        }
        rewritten.push_str(&output[cursor..]);
        rewritten
    }
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockLlm;
    use confucius_proto::{ActionKind, Message};

    struct Upper;

    impl Extension for Upper {
        fn name(&self) -> &str {
            "upper"
        }

        fn can_handle(&self, action: &Action) -> bool {
            action.kind == ActionKind::Thinking
        }

        fn execute(&self, action: &mut Action, _ctx: &mut RunContext) -> Result<(), ExtensionError> {
            let upper = action.content.to_uppercase();
            action.set_result(upper);
            Ok(())
        }
    }

    fn top_ctx() -> RunContext {
        RunContext::new("parent", MemoryManager::default())
    }

    #[test]
    fn test_delegation_is_replaced_with_result() {
        let llm = Arc::new(MockLlm::new(vec!["child says hi".to_string()]));
        let ext = SubagentExtension::new(llm.clone(), &[]);

        let output = "before <subagent name=\"Scout\">look around</subagent> after".to_string();
        let rewritten = ext.on_llm_output(output, &mut top_ctx());

        assert_eq!(
            rewritten,
            "before <subagent_result name=\"Scout\" call_index=\"0\">\nchild says hi\n</subagent_result> after"
        );

        let trace = ext.trace();
        assert_eq!(trace.len(), 1);
        assert_eq!(trace[0].status, CallStatus::Success);
        assert_eq!(trace[0].depth, 1);
        assert_eq!(ext.live_depth(), 0);
    }

    #[test]
    fn test_child_memory_is_isolated() {
        let llm = Arc::new(MockLlm::new(vec!["ok".to_string()]));
        let ext = SubagentExtension::new(llm.clone(), &[]);

        let mut ctx = top_ctx();
        ctx.memory.add(confucius_proto::Role::User, "parent secret");
        ext.on_llm_output("<subagent name=\"A\">task</subagent>".to_string(), &mut ctx);

        let child_call = &llm.calls()[0];
        assert!(child_call.iter().all(|m| m.content != "parent secret"));
        assert_eq!(child_call[0].content, "You are A, a specialized subagent.");
        assert_eq!(child_call[1].content, "task");
    }

    #[test]
    fn test_multiple_delegations_are_indexed() {
        let llm = Arc::new(MockLlm::new(vec!["one".to_string(), "two".to_string()]));
        let ext = SubagentExtension::new(llm, &[]);

        let rewritten = ext.on_llm_output(
            "<subagent name=\"A\">x</subagent><subagent name=\"B\">y</subagent>".to_string(),
            &mut top_ctx(),
        );

        assert!(rewritten.contains("name=\"A\" call_index=\"0\">\none"));
        assert!(rewritten.contains("name=\"B\" call_index=\"1\">\ntwo"));
        assert_eq!(ext.trace().len(), 2);
    }

    #[test]
    fn test_depth_limit_rejects_without_spawning() {
        let llm = Arc::new(MockLlm::new(vec!["never".to_string()]));
        let ext = SubagentExtension::new(llm.clone(), &[]).with_max_depth(1);

        let mut ctx = top_ctx();
        ctx.depth = 1;
        let rewritten = ext.on_llm_output(
            "<subagent name=\"Deep\">go deeper</subagent>".to_string(),
            &mut ctx,
        );

        assert_eq!(rewritten, "[ERROR: Subagent depth limit reached (1)]");
        assert!(ext.trace().is_empty());
        assert_eq!(llm.call_count(), 0);
    }

    #[test]
    fn test_child_error_is_contained() {
        let failing = |_: &[Message]| -> Result<String, LlmError> {
            Err(LlmError::backend("provider down"))
        };
        let ext = SubagentExtension::new(Arc::new(failing), &[]);

        let rewritten = ext.on_llm_output(
            "<subagent name=\"Flaky\">work</subagent>".to_string(),
            &mut top_ctx(),
        );

        assert!(rewritten.contains("Subagent failed with error:"));
        assert!(rewritten.contains("provider down"));
        let trace = ext.trace();
        assert_eq!(trace[0].status, CallStatus::Error);
        assert!(trace[0].actions_taken.is_empty());
        assert_eq!(ext.live_depth(), 0);
    }

    #[test]
    fn test_child_timeout_status() {
        let slow = |_: &[Message]| -> Result<String, LlmError> {
            Err(LlmError::Timeout(std::time::Duration::from_secs(1)))
        };
        let ext = SubagentExtension::new(Arc::new(slow), &[]);
        ext.on_llm_output("<subagent name=\"S\">w</subagent>".to_string(), &mut top_ctx());

        assert_eq!(ext.trace()[0].status, CallStatus::Timeout);
    }

    #[test]
    fn test_child_uses_filtered_extensions() {
        let llm: Arc<MockLlm> = Arc::new(MockLlm::new(vec![
            "<thinking>quiet</thinking>".to_string(),
            "nothing more".to_string(),
        ]));
        let inner: Arc<dyn Extension> = Arc::new(SubagentExtension::new(llm.clone(), &[]));
        let available: ExtensionList = vec![Arc::new(Upper), inner];
        let ext = SubagentExtension::new(llm.clone(), &available);

        ext.on_llm_output("<subagent name=\"T\">think</subagent>".to_string(), &mut top_ctx());

        let call = &ext.trace()[0];
        assert_eq!(call.actions_taken, vec!["thinking"]);
        assert_eq!(call.status, CallStatus::Success);
        // Child saw the thinking result fed back
        assert!(llm.calls()[1].iter().any(|m| m.content == "<result>QUIET</result>"));
    }

    #[test]
    fn test_child_hitting_cap_is_failed() {
        let llm = Arc::new(MockLlm::new(vec!["<thinking>again</thinking>".to_string()]));
        let available: ExtensionList = vec![Arc::new(Upper)];
        let ext = SubagentExtension::new(llm, &available).with_max_iterations(2);

        ext.on_llm_output("<subagent name=\"L\">loop</subagent>".to_string(), &mut top_ctx());

        let call = &ext.trace()[0];
        assert_eq!(call.status, CallStatus::Failed);
        assert_eq!(call.snapshot["iterations"], 2);
    }

    #[test]
    fn test_clear_trace_resets_numbering() {
        let llm = Arc::new(MockLlm::new(vec!["r".to_string()]));
        let ext = SubagentExtension::new(llm, &[]);
        ext.on_llm_output("<subagent name=\"A\">x</subagent>".to_string(), &mut top_ctx());
        assert!(ext.trace_summary().contains("[0] A"));

        ext.clear_trace();
        assert_eq!(ext.trace_summary(), "No subagent calls recorded.");

        let rewritten = ext.on_llm_output("<subagent name=\"B\">y</subagent>".to_string(), &mut top_ctx());
        assert!(rewritten.contains("call_index=\"0\""));
    }

    #[test]
    fn test_summaries_are_truncated() {
        let long_output = "o".repeat(500);
        let llm = Arc::new(MockLlm::new(vec![long_output.clone()]));
        let ext = SubagentExtension::new(llm, &[]);
        let task = "t".repeat(400);

        ext.on_llm_output(format!("<subagent name=\"A\">{task}</subagent>"), &mut top_ctx());

        let call = &ext.trace()[0];
        assert_eq!(call.input_summary.len(), 150);
        assert_eq!(call.output_summary.len(), 200);
        assert_eq!(call.full_output, long_output);
    }
}
