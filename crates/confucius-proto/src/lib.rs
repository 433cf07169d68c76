//! # confucius-proto
//!
//! Shared types, error definitions, and traits for the Confucius Agent framework.
//!
//! This crate provides the foundational abstractions used across all Confucius crates,
//! including:
//! - Action types parsed out of model output
//! - Conversation messages and roles
//! - The `LlmClient` interface every model backend implements
//! - Common error types

mod action;
mod error;
mod llm;
mod message;

pub use action::{Action, ActionKind, Attributes};
pub use error::LlmError;
pub use llm::LlmClient;
pub use message::{Message, Role};
