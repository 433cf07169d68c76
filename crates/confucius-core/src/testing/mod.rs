//! Testing utilities for deterministic runs without a live model.

pub mod mock_llm;
pub mod scenario;

pub use mock_llm::MockLlm;
pub use scenario::{Scenario, ScenarioRunner, ScenarioTrace};
