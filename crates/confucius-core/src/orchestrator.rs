//! The inner action loop.
//!
//! One `run` call appends the task to memory, then repeatedly calls the
//! model, parses its output into actions, dispatches each action to an
//! extension and feeds the outcome back as a user message. The loop ends on
//! an explicit completion signal, on output with no actions, on the
//! iteration cap, or on cancellation.

use crate::action_parser::ActionParser;
use crate::cancel::CancelToken;
use crate::config::OrchestratorConfig;
use crate::context::RunContext;
use crate::error::Result;
use crate::extension::{ExtensionList, apply_input_hooks, apply_output_hooks, dispatch};
use crate::memory::MemoryManager;
use confucius_proto::{Action, ActionKind, LlmClient, Message, Role};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Result text recorded for a completion action no extension claimed.
pub const COMPLETION_ACK: &str = "completion acknowledged";

/// Reason an orchestrator run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    /// A completion action fired or a completion phrase was seen.
    CompletionSignal,
    /// The model produced output with no actions (implicit completion).
    NoActions,
    /// The iteration cap was reached.
    MaxIterations,
    /// The cancel token was triggered.
    Cancelled,
}

impl TerminationReason {
    /// Returns the process exit code for this reason.
    ///
    /// - 0: completed (explicitly or implicitly)
    /// - 2: iteration limit
    /// - 130: cancelled (SIGINT = 128 + 2)
    pub fn exit_code(self) -> i32 {
        match self {
            TerminationReason::CompletionSignal | TerminationReason::NoActions => 0,
            TerminationReason::MaxIterations => 2,
            TerminationReason::Cancelled => 130,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TerminationReason::CompletionSignal => "completion_signal",
            TerminationReason::NoActions => "no_actions",
            TerminationReason::MaxIterations => "max_iterations",
            TerminationReason::Cancelled => "cancelled",
        }
    }

    /// True for both explicit and implicit completion.
    pub fn is_success(self) -> bool {
        matches!(
            self,
            TerminationReason::CompletionSignal | TerminationReason::NoActions
        )
    }
}

/// Outcome of one executed action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRecord {
    pub kind: ActionKind,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extension: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Structured result of `Orchestrator::run`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    pub success: bool,
    pub iterations: u32,
    /// Completion text, or the last model output if the run never completed.
    pub final_output: String,
    pub actions: Vec<ActionRecord>,
    pub termination: TerminationReason,
    /// Every model output of the run, in order, after output hooks.
    #[serde(default)]
    pub outputs: Vec<String>,
}

impl RunResult {
    /// True only when the run ended on an explicit completion signal.
    pub fn completed_explicitly(&self) -> bool {
        self.termination == TerminationReason::CompletionSignal
    }
}

/// Iterate/parse/dispatch loop around one LLM client.
pub struct Orchestrator {
    llm: Arc<dyn LlmClient>,
    extensions: ExtensionList,
    parser: ActionParser,
    max_iterations: u32,
    system_prompt: Option<String>,
    context: RunContext,
    cancel: CancelToken,
}

impl Orchestrator {
    /// Creates an orchestrator with default memory and a 50-iteration cap.
    pub fn new(llm: Arc<dyn LlmClient>, extensions: ExtensionList) -> Self {
        Self {
            llm,
            extensions,
            parser: ActionParser::new(),
            max_iterations: 50,
            system_prompt: None,
            context: RunContext::new("session_0", MemoryManager::default()),
            cancel: CancelToken::new(),
        }
    }

    /// Applies iteration cap and system prompt from configuration.
    pub fn with_config(mut self, config: &OrchestratorConfig) -> Self {
        self.max_iterations = config.max_iterations;
        if let Some(ref prompt) = config.system_prompt {
            self.system_prompt = Some(prompt.clone());
        }
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        let prompt = prompt.into();
        self.system_prompt = (!prompt.is_empty()).then_some(prompt);
        self
    }

    /// Replaces the working memory.
    pub fn with_memory(mut self, memory: MemoryManager) -> Self {
        self.context.memory = memory;
        self
    }

    /// Replaces the whole run context (session id, depth, memory).
    pub fn with_context(mut self, context: RunContext) -> Self {
        self.context = context;
        self
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_parser(mut self, parser: ActionParser) -> Self {
        self.parser = parser;
        self
    }

    pub fn context(&self) -> &RunContext {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut RunContext {
        &mut self.context
    }

    pub fn into_context(self) -> RunContext {
        self.context
    }

    pub fn memory(&self) -> &MemoryManager {
        &self.context.memory
    }

    pub fn extensions(&self) -> &ExtensionList {
        &self.extensions
    }

    pub fn max_iterations(&self) -> u32 {
        self.max_iterations
    }

    /// Runs `task` to completion, exhaustion or cancellation.
    ///
    /// Per-action failures are fed back to the model and never abort the
    /// run. Only a failing model call returns `Err`.
    pub fn run(&mut self, task: &str) -> Result<RunResult> {
        let started = Instant::now();
        self.context.memory.add(Role::User, task);

        let mut iteration: u32 = 0;
        let mut termination: Option<TerminationReason> = None;
        let mut final_output = String::new();
        let mut records = Vec::new();
        let mut outputs = Vec::new();

        while iteration < self.max_iterations {
            if self.cancel.is_cancelled() {
                termination = Some(TerminationReason::Cancelled);
                break;
            }

            iteration += 1;
            self.context
                .set_attribute("current_iteration", u64::from(iteration));
            info!(
                iteration,
                max_iterations = self.max_iterations,
                depth = self.context.depth,
                session = %self.context.session_id,
                "Orchestrator iteration"
            );

            let outbound = self.prepare_messages();

            if self.cancel.is_cancelled() {
                termination = Some(TerminationReason::Cancelled);
                break;
            }

            let raw = self.llm.complete(&outbound)?;
            let output = apply_output_hooks(&self.extensions, raw, &mut self.context);
            self.context.memory.add(Role::Assistant, output.clone());
            debug!(output_len = output.len(), "Model output received");
            outputs.push(output.clone());

            let actions = self.parser.parse(&output);
            if actions.is_empty() {
                debug!("No actions in output, treating as implicit completion");
                termination = Some(TerminationReason::NoActions);
                final_output = output;
                break;
            }

            for mut action in actions {
                let extension = self.execute_action(&mut action);

                records.push(ActionRecord {
                    kind: action.kind,
                    success: action.error().is_none(),
                    extension,
                    error: action.error().map(str::to_string),
                });

                if let Some(error) = action.error() {
                    self.context
                        .memory
                        .add(Role::User, format!("<error>{error}</error>"));
                } else if let Some(result) = action.result()
                    && !result.is_empty()
                {
                    self.context
                        .memory
                        .add(Role::User, format!("<result>{result}</result>"));
                }

                if action.kind == ActionKind::Completion {
                    termination = Some(TerminationReason::CompletionSignal);
                    final_output = action.content;
                    break;
                }
            }

            // Second, independent check against the raw output
            if self.parser.has_completion_phrase(&output) {
                if termination.is_none() {
                    final_output = output.clone();
                }
                termination = Some(TerminationReason::CompletionSignal);
            }

            if termination.is_some() {
                break;
            }
            final_output = output;
        }

        let termination = termination.unwrap_or(if self.cancel.is_cancelled() {
            TerminationReason::Cancelled
        } else {
            TerminationReason::MaxIterations
        });

        if termination == TerminationReason::MaxIterations {
            warn!(
                iterations = iteration,
                "Orchestrator reached max iterations without completing"
            );
        }

        info!(
            reason = termination.as_str(),
            iterations = iteration,
            actions = records.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Orchestrator run finished"
        );

        Ok(RunResult {
            success: termination.is_success(),
            iterations: iteration,
            final_output,
            actions: records,
            termination,
            outputs,
        })
    }

    /// Builds the outbound message list: hooks over memory, system prompt first.
    fn prepare_messages(&mut self) -> Vec<Message> {
        let history = self.context.memory.messages().to_vec();
        let shaped = apply_input_hooks(&self.extensions, history, &mut self.context);

        let mut outbound = Vec::with_capacity(shaped.len() + 1);
        if let Some(ref prompt) = self.system_prompt {
            outbound.push(Message::system(prompt.clone()));
        }
        outbound.extend(shaped);
        outbound
    }

    /// Routes one action; unclaimed completion actions are acknowledged.
    fn execute_action(&mut self, action: &mut Action) -> Option<String> {
        debug!(kind = %action.kind, "Executing action");

        if action.kind == ActionKind::Completion
            && !self.extensions.iter().any(|ext| ext.can_handle(action))
        {
            action.set_result(COMPLETION_ACK);
            return None;
        }

        dispatch(&self.extensions, action, &mut self.context)
    }
}
