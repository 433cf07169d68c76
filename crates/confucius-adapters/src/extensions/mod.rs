//! Built-in extensions.
//!
//! Action handlers:
//! - [`BashExtension`] runs shell commands
//! - [`FileEditExtension`] writes, appends, deletes and patches files
//! - [`FileReadExtension`] reads files into the transcript
//! - [`FileSearchExtension`] finds files by name or content
//! - [`ThinkingExtension`] records reasoning without side effects
//!
//! Prompt shapers, which claim no actions:
//! - [`PlanningExtension`]
//! - [`PromptCacheExtension`]

mod bash;
mod file_edit;
mod file_read;
mod file_search;
mod planning;
mod prompt_cache;
mod thinking;

pub use bash::BashExtension;
pub use file_edit::{FileEditExtension, PatchBlock, parse_patch};
pub use file_read::FileReadExtension;
pub use file_search::{FileSearchExtension, MAX_SEARCH_RESULTS};
pub use planning::{PLANNING_GUIDANCE, PlanningExtension};
pub use prompt_cache::{CACHE_MIN_CHARS, PromptCacheExtension};
pub use thinking::ThinkingExtension;

/// Cuts `text` to at most `max` characters on a char boundary, appending a
/// marker with the number of characters dropped.
pub(crate) fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        None => text.to_string(),
        Some((cut, _)) => {
            let dropped = text[cut..].chars().count();
            format!("{}\n\n[... truncated {dropped} characters ...]", &text[..cut])
        }
    }
}
