//! Assembles a coding agent from configuration.

use crate::extensions::{
    BashExtension, FileEditExtension, FileReadExtension, FileSearchExtension, PlanningExtension,
    PromptCacheExtension, ThinkingExtension,
};
use confucius_core::{
    AgentConfig, CancelToken, ExtensionList, MemoryManager, RalphOrchestrator, Result, SubagentExtension,
};
use confucius_proto::LlmClient;
use std::sync::Arc;
use tracing::info;

const CAPABILITIES: &str = "\
Your capabilities:
- <bash>command</bash> - Execute shell commands
- <file_edit path=\"file.py\">content</file_edit> - Write a file (operation=\"append|delete|patch\" for other edits)
- <file_read>path/to/file</file_read> - Read file contents
- <search pattern=\"*.py\"> - Search for files (search_type=\"content\" to search inside them)
- <thinking>reasoning</thinking> - Internal reasoning (not executed)";

const SUBAGENT_CAPABILITY: &str =
    "- <subagent name=\"Name\">task</subagent> - Delegate a focused subtask to a specialist";

const WORKFLOW: &str = "\
Work step-by-step:
1. Understand the task and plan your approach
2. Execute necessary actions (read files, run tests, edit code)
3. Verify your changes work
4. Signal completion when done";

/// System prompt for coding tasks, naming the configured completion promise.
pub fn coding_system_prompt(config: &AgentConfig) -> String {
    let mut prompt = String::from("You are an expert software engineering agent.\n\n");
    prompt.push_str(CAPABILITIES);
    if config.subagents.enabled {
        prompt.push('\n');
        prompt.push_str(SUBAGENT_CAPABILITY);
    }
    prompt.push_str("\n\n");
    if !config.ralph.completion_promise.is_empty() {
        prompt.push_str(&format!(
            "When the whole task is complete, include {} in your response.\n\n",
            config.ralph.completion_promise
        ));
    }
    prompt.push_str(WORKFLOW);
    prompt
}

/// The built-in extension bundle, in dispatch order.
pub fn default_extensions(config: &AgentConfig) -> ExtensionList {
    let root = &config.workspace.root;
    let mut extensions: ExtensionList = Vec::new();

    if config.extensions.planning {
        extensions.push(Arc::new(PlanningExtension::new()));
    }
    if config.extensions.prompt_cache {
        extensions.push(Arc::new(PromptCacheExtension::new(&config.extensions.cache_provider)));
    }

    extensions.push(Arc::new(BashExtension::from_config(&config.workspace)));
    extensions.push(Arc::new(FileEditExtension::new(root)));
    extensions.push(Arc::new(
        FileReadExtension::new(root).with_max_chars(config.workspace.max_read_chars),
    ));
    extensions.push(Arc::new(FileSearchExtension::new(root)));
    extensions.push(Arc::new(ThinkingExtension::new()));
    extensions
}

/// A configured Ralph loop plus a handle on its subagent extension.
pub struct CodingAgent {
    pub ralph: RalphOrchestrator,
    /// Present when subagents are enabled; exposes the delegation trace.
    pub subagents: Option<Arc<SubagentExtension>>,
}

/// Builds a coding agent with a fresh cancellation token.
pub fn coding_agent(llm: Arc<dyn LlmClient>, config: &AgentConfig) -> Result<CodingAgent> {
    coding_agent_with_cancel(llm, config, CancelToken::new())
}

/// Builds a coding agent whose loop and subagents observe `cancel`.
pub fn coding_agent_with_cancel(
    llm: Arc<dyn LlmClient>,
    config: &AgentConfig,
    cancel: CancelToken,
) -> Result<CodingAgent> {
    let mut extensions = default_extensions(config);

    let subagents = config.subagents.enabled.then(|| {
        Arc::new(
            SubagentExtension::new(llm.clone(), &extensions)
                .with_config(&config.subagents)
                .with_memory_config(config.memory.clone())
                .with_cancel_token(cancel.clone()),
        )
    });
    if let Some(ref ext) = subagents {
        extensions.push(ext.clone());
    }

    info!(
        extensions = extensions.len(),
        subagents = subagents.is_some(),
        workspace = %config.workspace.root,
        "Assembled coding agent"
    );

    let system_prompt = config
        .orchestrator
        .system_prompt
        .clone()
        .unwrap_or_else(|| coding_system_prompt(config));

    let ralph = RalphOrchestrator::new(llm, extensions, config.ralph.clone())?
        .with_orchestrator_config(&config.orchestrator)
        .with_system_prompt(system_prompt)
        .with_memory(MemoryManager::from_config(&config.memory))
        .with_cancel_token(cancel);

    Ok(CodingAgent { ralph, subagents })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_bundle_order() {
        let config = AgentConfig::default();
        let names: Vec<_> = default_extensions(&config)
            .iter()
            .map(|ext| ext.name().to_string())
            .collect();

        assert_eq!(
            names,
            vec!["planning", "bash", "file_edit", "file_read", "file_search", "thinking"]
        );
    }

    #[test]
    fn test_optional_extensions() {
        let mut config = AgentConfig::default();
        config.extensions.planning = false;
        config.extensions.prompt_cache = true;

        let names: Vec<_> = default_extensions(&config)
            .iter()
            .map(|ext| ext.name().to_string())
            .collect();

        assert_eq!(names[0], "prompt_cache");
        assert!(!names.contains(&"planning".to_string()));
    }

    #[test]
    fn test_system_prompt_names_promise_and_subagents() {
        let mut config = AgentConfig::default();
        config.ralph.completion_promise = "SHIP_IT".to_string();

        let prompt = coding_system_prompt(&config);
        assert!(prompt.contains("include SHIP_IT in your response"));
        assert!(prompt.contains("<subagent name="));

        config.subagents.enabled = false;
        assert!(!coding_system_prompt(&config).contains("<subagent"));
    }
}
