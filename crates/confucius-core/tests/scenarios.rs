//! YAML scenario tests for the Ralph loop.
//!
//! Each file under `tests/scenarios/` scripts the model and states the
//! expected outcome.

use confucius_core::testing::{Scenario, ScenarioRunner};
use confucius_core::{Extension, ExtensionError, ExtensionList, RunContext};
use confucius_proto::{Action, ActionKind};
use std::path::Path;
use std::sync::Arc;

/// Acknowledges thinking actions so scenarios can exercise dispatch.
struct Notebook;

impl Extension for Notebook {
    fn name(&self) -> &str {
        "notebook"
    }

    fn can_handle(&self, action: &Action) -> bool {
        action.kind == ActionKind::Thinking
    }

    fn execute(&self, action: &mut Action, _ctx: &mut RunContext) -> Result<(), ExtensionError> {
        action.set_result("noted");
        Ok(())
    }
}

fn run_scenario(file: &str) {
    let path = Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests/scenarios")
        .join(file);
    let scenario = Scenario::from_file(&path).unwrap_or_else(|e| panic!("{e}"));

    let extensions: ExtensionList = vec![Arc::new(Notebook)];
    let trace = ScenarioRunner::new()
        .with_extensions(extensions)
        .run(&scenario)
        .unwrap_or_else(|e| panic!("{}: run failed: {}", scenario.name, e));
    let expected = &scenario.expected;
    let outcome = &trace.outcome;

    assert_eq!(
        outcome.ralph_iterations, expected.ralph_iterations,
        "{}: ralph iterations",
        scenario.name
    );
    assert_eq!(outcome.success, expected.success, "{}: success", scenario.name);
    if let Some(termination) = expected.termination {
        assert_eq!(outcome.termination, termination, "{}: termination", scenario.name);
    }
    if let Some(total) = expected.total_orchestrator_iterations {
        assert_eq!(
            outcome.total_orchestrator_iterations, total,
            "{}: total orchestrator iterations",
            scenario.name
        );
    }
    if let Some(calls) = expected.llm_calls {
        assert_eq!(trace.llm_calls, calls, "{}: llm calls", scenario.name);
    }
    if let Some(ref actions) = expected.actions {
        assert_eq!(&trace.action_kinds(), actions, "{}: actions", scenario.name);
    }
}

#[test]
fn test_promise_after_three() {
    run_scenario("promise_after_three.yml");
}

#[test]
fn test_exhaustion() {
    run_scenario("exhaustion.yml");
}

#[test]
fn test_unroutable_feedback() {
    run_scenario("unroutable_feedback.yml");
}

#[test]
fn test_nested_caps() {
    run_scenario("nested_caps.yml");
}

#[test]
fn test_compression() {
    run_scenario("compression.yml");
}
