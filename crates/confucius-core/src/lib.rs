//! # confucius-core
//!
//! Core orchestration for the Confucius Agent framework.
//!
//! This crate provides:
//! - The action parser that turns model output into typed actions
//! - The `Extension` contract and first-match dispatch
//! - The inner `Orchestrator` loop and the outer Ralph retry loop
//! - Token-budgeted working memory with compression
//! - Depth-bounded subagent delegation
//! - Markdown notes distilled from finished sessions
//! - Configuration loading and validation

mod action_parser;
mod cancel;
mod config;
mod context;
mod error;
mod extension;
mod memory;
pub mod notes;
mod orchestrator;
mod ralph_loop;
mod subagent;
mod tags;
pub mod testing;
mod trajectory;

pub use action_parser::{ActionParser, COMPLETION_PHRASES};
pub use cancel::CancelToken;
pub use config::{
    AgentConfig, CliConfig, ConfigError, ConfigWarning, ExtensionsConfig, MemoryConfig,
    OrchestratorConfig, RalphLoopConfig, SubagentConfig, WorkspaceConfig,
};
pub use context::RunContext;
pub use error::{Error, Result};
pub use extension::{
    Extension, ExtensionError, ExtensionList, apply_input_hooks, apply_output_hooks, dispatch,
};
pub use memory::{
    COMPRESSED_PREFIX, CharRatioEstimator, KEEP_RECENT, MemoryHierarchy, MemoryManager,
    MemoryScope, TokenEstimator,
};
pub use notes::{
    EventKind, Hindsight, Note, NoteError, NoteStore, NoteTaker, NoteType, SessionEvent,
};
pub use orchestrator::{
    ActionRecord, COMPLETION_ACK, Orchestrator, RunResult, TerminationReason,
};
pub use ralph_loop::{
    MemorySummary, RalphOrchestrator, RalphOutcome, RalphTermination, TrajectoryEntry,
    session_events,
};
pub use subagent::{CallStatus, SubagentCall, SubagentExtension};
pub use trajectory::{Record, TrajectoryRecorder};
