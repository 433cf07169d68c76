//! Outer retry loop around the orchestrator.
//!
//! `RalphOrchestrator` re-runs the same task against one orchestrator (and
//! therefore one shared memory) until the completion promise shows up in a
//! run's output, a run signals completion explicitly, the outer iteration
//! cap is reached, or the run is cancelled. When the loop ends the
//! trajectory is optionally distilled into notes and written as JSONL.

use crate::cancel::CancelToken;
use crate::config::{OrchestratorConfig, RalphLoopConfig};
use crate::error::Result;
use crate::extension::ExtensionList;
use crate::memory::{MemoryHierarchy, MemoryManager};
use crate::notes::{EventKind, Note, NoteStore, NoteTaker, SessionEvent};
use crate::orchestrator::{Orchestrator, RunResult, TerminationReason};
use crate::trajectory::{Record, TrajectoryRecorder};
use chrono::{DateTime, Utc};
use confucius_proto::LlmClient;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

/// Prefix of output lines distilled into decision notes.
const DECISION_PREFIX: &str = "decision:";

/// Reason the outer loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RalphTermination {
    /// The completion promise appeared in a run's final output.
    CompletionPromise,
    /// A run ended on an explicit completion signal.
    CompletionSignal,
    /// The outer iteration cap was reached.
    MaxIterations,
    /// The cancel token was triggered.
    Cancelled,
}

impl RalphTermination {
    /// Returns the process exit code: 0 on completion, 2 on exhaustion,
    /// 130 on cancellation.
    pub fn exit_code(self) -> i32 {
        match self {
            RalphTermination::CompletionPromise | RalphTermination::CompletionSignal => 0,
            RalphTermination::MaxIterations => 2,
            RalphTermination::Cancelled => 130,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RalphTermination::CompletionPromise => "completion_promise",
            RalphTermination::CompletionSignal => "completion_signal",
            RalphTermination::MaxIterations => "max_iterations",
            RalphTermination::Cancelled => "cancelled",
        }
    }

    pub fn is_success(self) -> bool {
        matches!(
            self,
            RalphTermination::CompletionPromise | RalphTermination::CompletionSignal
        )
    }

    /// Outcome label written into the session summary note.
    fn outcome(self) -> &'static str {
        match self {
            RalphTermination::CompletionPromise | RalphTermination::CompletionSignal => "completed",
            RalphTermination::MaxIterations => "max_iterations_reached",
            RalphTermination::Cancelled => "cancelled",
        }
    }
}

/// One outer iteration of the loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrajectoryEntry {
    pub iteration: u32,
    pub result: RunResult,
    pub timestamp: DateTime<Utc>,
}

/// Result of `run_ralph_loop`.
#[derive(Debug, Clone, Serialize)]
pub struct RalphOutcome {
    pub success: bool,
    pub session_id: String,
    pub ralph_iterations: u32,
    /// Sum of inner iterations across all outer iterations.
    pub total_orchestrator_iterations: u32,
    pub completion_promise_found: bool,
    pub termination: RalphTermination,
    pub trajectory: Vec<TrajectoryEntry>,
    /// Logical paths of notes written for this session.
    pub notes_created: Vec<String>,
    pub memory_hierarchy: MemoryHierarchy,
}

/// Snapshot of the shared memory.
#[derive(Debug, Clone, Serialize)]
pub struct MemorySummary {
    pub message_count: usize,
    pub estimated_tokens: usize,
    pub compressed_messages: usize,
    pub compressions: u32,
    pub hierarchy: MemoryHierarchy,
}

/// Ralph loop: repeat an orchestrator run until a completion signal.
pub struct RalphOrchestrator {
    config: RalphLoopConfig,
    orchestrator: Orchestrator,
    notes: Option<NoteStore>,
    cancel: CancelToken,
}

impl RalphOrchestrator {
    /// Creates the loop. Opens the note store when notes are enabled.
    pub fn new(llm: Arc<dyn LlmClient>, extensions: ExtensionList, config: RalphLoopConfig) -> Result<Self> {
        let notes = if !config.enable_notes {
            None
        } else if config.notes_path.trim().is_empty() {
            warn!("Notes enabled without a path, skipping note distillation");
            None
        } else {
            Some(NoteStore::open(&config.notes_path)?)
        };

        Ok(Self {
            orchestrator: Orchestrator::new(llm, extensions).with_config(&OrchestratorConfig::default()),
            config,
            notes,
            cancel: CancelToken::new(),
        })
    }

    /// Applies the inner loop's iteration cap and system prompt.
    pub fn with_orchestrator_config(mut self, config: &OrchestratorConfig) -> Self {
        self.orchestrator = self.orchestrator.with_config(config);
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.orchestrator = self.orchestrator.with_system_prompt(prompt);
        self
    }

    pub fn with_memory(mut self, memory: MemoryManager) -> Self {
        self.orchestrator = self.orchestrator.with_memory(memory);
        self
    }

    /// Shares `cancel` with the inner orchestrator.
    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.orchestrator = self.orchestrator.with_cancel_token(cancel.clone());
        self.cancel = cancel;
        self
    }

    pub fn config(&self) -> &RalphLoopConfig {
        &self.config
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    pub fn memory(&self) -> &MemoryManager {
        self.orchestrator.memory()
    }

    pub fn note_store(&self) -> Option<&NoteStore> {
        self.notes.as_ref()
    }

    /// Runs `task` until completion, exhaustion or cancellation.
    ///
    /// Exhaustion is reported through the outcome, not as an error. Only a
    /// failing model call returns `Err`.
    pub fn run_ralph_loop(&mut self, task: &str) -> Result<RalphOutcome> {
        let session_id = new_session_id();
        let max_iterations = self.config.max_iterations;
        let promise = self.config.completion_promise.clone();

        info!(
            session = %session_id,
            max_iterations,
            completion_promise = %promise,
            "Ralph loop starting"
        );

        let recorder = self.open_recorder(&session_id);
        if let Some(ref recorder) = recorder {
            recorder.record(&Record::loop_start(&session_id, task, &promise, max_iterations));
        }

        let mut iteration: u32 = 0;
        let mut termination: Option<RalphTermination> = None;
        let mut trajectory: Vec<TrajectoryEntry> = Vec::new();

        while iteration < max_iterations {
            if self.cancel.is_cancelled() {
                termination = Some(RalphTermination::Cancelled);
                break;
            }

            iteration += 1;
            if self.config.verbose {
                info!(iteration, max_iterations, "Ralph iteration");
            } else {
                debug!(iteration, max_iterations, "Ralph iteration");
            }

            let result = self.orchestrator.run(task)?;

            if let Some(ref recorder) = recorder {
                let elapsed_ms = recorder.elapsed().as_millis() as u64;
                recorder.record(&Record::iteration(iteration, elapsed_ms, &result));
            }

            let promise_found = !promise.is_empty() && result.final_output.contains(&promise);
            let explicit = result.completed_explicitly();
            let cancelled = result.termination == TerminationReason::Cancelled;

            trajectory.push(TrajectoryEntry {
                iteration,
                result,
                timestamp: Utc::now(),
            });

            if promise_found {
                info!(iteration, "Completion promise found");
                termination = Some(RalphTermination::CompletionPromise);
                break;
            }
            if explicit {
                info!(iteration, "Orchestrator signaled completion");
                termination = Some(RalphTermination::CompletionSignal);
                break;
            }
            if cancelled {
                termination = Some(RalphTermination::Cancelled);
                break;
            }

            if iteration < max_iterations && self.config.delay_seconds > 0 {
                debug!(delay_seconds = self.config.delay_seconds, "Waiting before next iteration");
                std::thread::sleep(Duration::from_secs(self.config.delay_seconds));
            }
        }

        let termination = termination.unwrap_or(RalphTermination::MaxIterations);
        let total_orchestrator_iterations = trajectory.iter().map(|e| e.result.iterations).sum();

        if termination == RalphTermination::MaxIterations {
            warn!(
                iterations = iteration,
                completion_promise = %promise,
                "Ralph loop stopped at max iterations without completing"
            );
        }

        let notes_created = self.distill(&session_id, &trajectory, termination);

        if let Some(ref recorder) = recorder {
            recorder.record(&Record::termination(
                termination.as_str(),
                iteration,
                total_orchestrator_iterations,
                recorder.elapsed().as_secs_f64(),
            ));
            if let Err(e) = recorder.flush() {
                warn!(error = %e, "Failed to flush trajectory");
            }
        }

        info!(
            reason = termination.as_str(),
            ralph_iterations = iteration,
            total_orchestrator_iterations,
            notes = notes_created.len(),
            "Ralph loop finished"
        );

        Ok(RalphOutcome {
            success: termination.is_success(),
            session_id,
            ralph_iterations: iteration,
            total_orchestrator_iterations,
            completion_promise_found: termination == RalphTermination::CompletionPromise,
            termination,
            trajectory,
            notes_created,
            memory_hierarchy: self.memory().hierarchy().clone(),
        })
    }

    /// Hindsight notes whose error text matches `pattern`.
    pub fn check_past_failures(&self, pattern: &str) -> Vec<Note> {
        self.notes
            .as_ref()
            .map(|store| store.search_failures(pattern).into_iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn memory_summary(&self) -> MemorySummary {
        let memory = self.memory();
        MemorySummary {
            message_count: memory.len(),
            estimated_tokens: memory.estimated_tokens(),
            compressed_messages: memory.compressed_messages(),
            compressions: memory.compression_count(),
            hierarchy: memory.hierarchy().clone(),
        }
    }

    /// Writes session notes. Failures are logged and yield no paths.
    fn distill(&mut self, session_id: &str, trajectory: &[TrajectoryEntry], termination: RalphTermination) -> Vec<String> {
        let Some(store) = self.notes.as_mut() else {
            return Vec::new();
        };

        let events = session_events(trajectory);
        match NoteTaker::new(store).distill_session(session_id, &events, termination.outcome()) {
            Ok(paths) => paths,
            Err(e) => {
                warn!(error = %e, "Failed to write session notes");
                Vec::new()
            }
        }
    }

    fn open_recorder(&self, session_id: &str) -> Option<TrajectoryRecorder<BufWriter<File>>> {
        let dir = Path::new(self.config.trace_dir.as_deref()?);
        let path = dir.join(format!("{session_id}.jsonl"));
        let file = fs::create_dir_all(dir).and_then(|()| File::create(&path));
        match file {
            Ok(file) => {
                debug!(path = %path.display(), "Recording trajectory");
                Some(TrajectoryRecorder::new(BufWriter::new(file)))
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Cannot record trajectory");
                None
            }
        }
    }
}

/// Flattens the trajectory for the note taker: decision lines from every
/// model output, failed actions, then the iteration's final output, per
/// outer iteration.
pub fn session_events(trajectory: &[TrajectoryEntry]) -> Vec<SessionEvent> {
    let mut events = Vec::new();
    for entry in trajectory {
        let output = &entry.result.final_output;
        let scanned: &[String] = if entry.result.outputs.is_empty() {
            std::slice::from_ref(output)
        } else {
            &entry.result.outputs
        };

        for line in scanned.iter().flat_map(|text| text.lines()) {
            let trimmed = line.trim_start();
            if trimmed.len() >= DECISION_PREFIX.len()
                && trimmed[..DECISION_PREFIX.len()].eq_ignore_ascii_case(DECISION_PREFIX)
            {
                let decision = trimmed[DECISION_PREFIX.len()..].trim();
                if !decision.is_empty() {
                    events.push(SessionEvent::new(entry.iteration, EventKind::Decision, decision));
                }
            }
        }

        for action in &entry.result.actions {
            if let Some(ref error) = action.error {
                events.push(SessionEvent::failed(entry.iteration, action.kind.as_str(), error.clone()));
            }
        }

        events.push(SessionEvent::new(entry.iteration, EventKind::Output, output.clone()));
    }
    events
}

static SESSION_SEQ: AtomicU64 = AtomicU64::new(0);

/// `ralph_session_<unix millis>_<pid>_<seq>`, unique across concurrent runs.
fn new_session_id() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    let seq = SESSION_SEQ.fetch_add(1, Ordering::Relaxed);
    format!("ralph_session_{millis}_{}_{seq}", std::process::id())
}
