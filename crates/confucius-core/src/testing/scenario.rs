//! YAML-driven end-to-end scenarios.
//!
//! A scenario scripts the model's responses, configures the loops and states
//! the expected outcome. `ScenarioRunner` drives a `RalphOrchestrator` with
//! a `MockLlm` and returns a trace for the test to assert against.

use super::mock_llm::MockLlm;
use crate::config::{MemoryConfig, OrchestratorConfig, RalphLoopConfig};
use crate::error::Result;
use crate::extension::ExtensionList;
use crate::memory::MemoryManager;
use crate::ralph_loop::{RalphOrchestrator, RalphOutcome, RalphTermination};
use confucius_proto::ActionKind;
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;

/// A scenario definition.
#[derive(Debug, Clone, Deserialize)]
pub struct Scenario {
    pub name: String,

    #[serde(default)]
    pub description: String,

    pub task: String,

    #[serde(default)]
    pub ralph: RalphLoopConfig,

    #[serde(default)]
    pub orchestrator: OrchestratorConfig,

    #[serde(default)]
    pub memory: MemoryConfig,

    /// Scripted model responses, cycled.
    #[serde(default)]
    pub mock_responses: Vec<String>,

    pub expected: Expected,
}

/// Expected outcome of a scenario.
#[derive(Debug, Clone, Deserialize)]
pub struct Expected {
    pub ralph_iterations: u32,
    pub success: bool,

    #[serde(default)]
    pub termination: Option<RalphTermination>,

    #[serde(default)]
    pub total_orchestrator_iterations: Option<u32>,

    #[serde(default)]
    pub llm_calls: Option<usize>,

    /// Kinds of every executed action, in order, across all iterations.
    #[serde(default)]
    pub actions: Option<Vec<ActionKind>>,
}

impl Scenario {
    pub fn from_yaml(yaml: &str) -> std::result::Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(yaml)
    }

    pub fn from_file(path: impl AsRef<Path>) -> std::result::Result<Self, String> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read {}: {}", path.display(), e))?;
        Self::from_yaml(&content).map_err(|e| format!("Failed to parse {}: {}", path.display(), e))
    }
}

/// Result of running a scenario.
#[derive(Debug)]
pub struct ScenarioTrace {
    pub outcome: RalphOutcome,
    pub llm_calls: usize,
}

impl ScenarioTrace {
    /// Kinds of every executed action, in order.
    pub fn action_kinds(&self) -> Vec<ActionKind> {
        self.outcome
            .trajectory
            .iter()
            .flat_map(|entry| entry.result.actions.iter().map(|a| a.kind))
            .collect()
    }
}

/// Executes scenarios against a mock model.
#[derive(Default)]
pub struct ScenarioRunner {
    extensions: ExtensionList,
}

impl ScenarioRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_extensions(mut self, extensions: ExtensionList) -> Self {
        self.extensions = extensions;
        self
    }

    /// Runs `scenario`. Notes, tracing and inter-iteration delays are
    /// disabled so runs are hermetic and fast.
    pub fn run(&self, scenario: &Scenario) -> Result<ScenarioTrace> {
        let llm = MockLlm::new(scenario.mock_responses.clone());
        let config = RalphLoopConfig {
            delay_seconds: 0,
            enable_notes: false,
            trace_dir: None,
            ..scenario.ralph.clone()
        };

        let mut ralph = RalphOrchestrator::new(Arc::new(llm.clone()), self.extensions.clone(), config)?
            .with_orchestrator_config(&scenario.orchestrator)
            .with_memory(MemoryManager::from_config(&scenario.memory));
        let outcome = ralph.run_ralph_loop(&scenario.task)?;

        Ok(ScenarioTrace {
            outcome,
            llm_calls: llm.call_count(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scenario_parses_with_defaults() {
        let scenario = Scenario::from_yaml(
            r"
name: minimal
task: do it
mock_responses: ['TASK_COMPLETE']
expected:
  ralph_iterations: 1
  success: true
",
        )
        .unwrap();

        assert_eq!(scenario.ralph.completion_promise, "TASK_COMPLETE");
        assert_eq!(scenario.orchestrator.max_iterations, 50);
        assert!(scenario.expected.termination.is_none());
    }

    #[test]
    fn test_runner_executes() {
        let scenario = Scenario::from_yaml(
            r"
name: promise
task: finish
mock_responses: ['not yet', 'TASK_COMPLETE']
ralph:
  max_iterations: 4
expected:
  ralph_iterations: 2
  success: true
",
        )
        .unwrap();

        let trace = ScenarioRunner::new().run(&scenario).unwrap();

        assert_eq!(trace.outcome.ralph_iterations, scenario.expected.ralph_iterations);
        assert_eq!(trace.outcome.termination, RalphTermination::CompletionPromise);
        assert_eq!(trace.llm_calls, 2);
        assert!(trace.action_kinds().is_empty());
    }
}
