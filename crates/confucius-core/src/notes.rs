//! Persistent markdown notes distilled from finished sessions.
//!
//! Notes live one file per note under a base directory. A note's logical
//! path is its file path relative to the base, `/`-separated, without the
//! `.md` suffix. Hindsight notes record a failure together with whatever
//! resolved it, and are what `search_failures` looks through.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info, warn};

/// Errors from the note store.
#[derive(Debug, thiserror::Error)]
pub enum NoteError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid note path '{0}'")]
    InvalidPath(String),
}

/// Category of a note.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoteType {
    Architecture,
    Decision,
    Solution,
    Failure,
    Research,
    Finding,
    Pattern,
}

impl NoteType {
    pub const ALL: [NoteType; 7] = [
        NoteType::Architecture,
        NoteType::Decision,
        NoteType::Solution,
        NoteType::Failure,
        NoteType::Research,
        NoteType::Finding,
        NoteType::Pattern,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            NoteType::Architecture => "architecture",
            NoteType::Decision => "decision",
            NoteType::Solution => "solution",
            NoteType::Failure => "failure",
            NoteType::Research => "research",
            NoteType::Finding => "finding",
            NoteType::Pattern => "pattern",
        }
    }

    /// Parses a type name, case-insensitively.
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim().to_lowercase();
        Self::ALL.into_iter().find(|t| t.as_str() == s)
    }
}

impl std::fmt::Display for NoteType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure-specific fields of a hindsight note.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hindsight {
    pub error_message: String,
    pub stack_trace: String,
    pub attempted_solutions: Vec<String>,
    pub resolution: Option<String>,
    pub prevention_tips: Vec<String>,
}

/// A single persisted note.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    pub path: String,
    pub title: String,
    pub content: String,
    pub note_type: NoteType,
    pub tags: Vec<String>,
    pub metadata: BTreeMap<String, Value>,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    /// Present only on hindsight (failure) notes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hindsight: Option<Hindsight>,
}

const HEADER_SCAN_LINES: usize = 10;
const HINDSIGHT_MARKER: &str = "(Hindsight)";

const SECTION_PROBLEM: &str = "Problem Description";
const SECTION_ERROR: &str = "Error Message";
const SECTION_TRACE: &str = "Stack Trace";
const SECTION_ATTEMPTS: &str = "Attempted Solutions";
const SECTION_RESOLUTION: &str = "Resolution";
const SECTION_TIPS: &str = "Prevention Tips";
const HINDSIGHT_SECTIONS: [&str; 6] = [
    SECTION_PROBLEM,
    SECTION_ERROR,
    SECTION_TRACE,
    SECTION_ATTEMPTS,
    SECTION_RESOLUTION,
    SECTION_TIPS,
];

impl Note {
    pub fn new(
        path: impl Into<String>,
        title: impl Into<String>,
        content: impl Into<String>,
        note_type: NoteType,
    ) -> Self {
        let now = Utc::now();
        Self {
            path: normalize_path(&path.into()),
            title: title.into(),
            content: content.into(),
            note_type,
            tags: Vec::new(),
            metadata: BTreeMap::new(),
            created: now,
            updated: now,
            hindsight: None,
        }
    }

    /// Creates a failure note. `failure` and `hindsight` are always tagged.
    pub fn hindsight(
        path: impl Into<String>,
        title: impl Into<String>,
        problem: impl Into<String>,
        hindsight: Hindsight,
    ) -> Self {
        let mut note = Self::new(path, title, problem, NoteType::Failure);
        note.tags = vec!["failure".to_string(), "hindsight".to_string()];
        note.hindsight = Some(hindsight);
        note
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for tag in tags {
            let tag = tag.into();
            if !self.tags.contains(&tag) {
                self.tags.push(tag);
            }
        }
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn is_hindsight(&self) -> bool {
        self.hindsight.is_some()
    }

    /// Renders the note as markdown.
    pub fn to_markdown(&self) -> String {
        let mut md = format!("# {}\n\n", self.title);
        if self.is_hindsight() {
            let _ = writeln!(md, "**Type:** {} {HINDSIGHT_MARKER}  ", self.note_type);
        } else {
            let _ = writeln!(md, "**Type:** {}  ", self.note_type);
        }
        let _ = writeln!(md, "**Created:** {}  ", self.created.to_rfc3339());
        let _ = writeln!(md, "**Updated:** {}  ", self.updated.to_rfc3339());
        if !self.tags.is_empty() {
            let _ = writeln!(md, "**Tags:** {}  ", self.tags.join(", "));
        }
        md.push_str("\n---\n\n");

        match self.hindsight {
            Some(ref h) => render_hindsight(&mut md, &self.content, h),
            None => {
                md.push_str(&self.content);
                md.push_str("\n\n---\n\n");
                if !self.metadata.is_empty() {
                    let json = serde_json::to_string_pretty(&self.metadata).unwrap_or_default();
                    let _ = write!(md, "## Metadata\n\n```json\n{json}\n```\n");
                }
            }
        }
        md
    }

    /// Parses a note rendered by `to_markdown`.
    ///
    /// Never fails: missing or malformed header lines fall back to defaults
    /// (type `finding`, timestamps of now).
    pub fn from_markdown(path: &str, text: &str) -> Self {
        let mut note = Note::new(path, "", "", NoteType::Finding);
        let mut hindsight = false;

        for line in text.lines().take(HEADER_SCAN_LINES) {
            if line.trim() == "---" {
                break;
            }
            if let Some(title) = line.strip_prefix("# ") {
                note.title = title.trim().to_string();
            } else if let Some(value) = header_value(line, "**Type:**") {
                hindsight = value.contains(HINDSIGHT_MARKER);
                let name = value.replace(HINDSIGHT_MARKER, "");
                if let Some(t) = NoteType::parse(&name) {
                    note.note_type = t;
                }
            } else if let Some(value) = header_value(line, "**Created:**") {
                if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
                    note.created = ts.with_timezone(&Utc);
                }
            } else if let Some(value) = header_value(line, "**Updated:**") {
                if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
                    note.updated = ts.with_timezone(&Utc);
                }
            } else if let Some(value) = header_value(line, "**Tags:**") {
                note.tags = value
                    .split(',')
                    .map(str::trim)
                    .filter(|t| !t.is_empty())
                    .map(str::to_string)
                    .collect();
            }
        }

        let body = text
            .find("\n---\n")
            .map_or(text, |pos| &text[pos + "\n---\n".len()..]);

        if hindsight {
            let (content, h) = parse_hindsight(body);
            note.content = content;
            note.hindsight = Some(h);
        } else {
            let (content, metadata) = parse_plain_body(body);
            note.content = content;
            note.metadata = metadata;
        }
        note
    }
}

fn header_value<'a>(line: &'a str, key: &str) -> Option<&'a str> {
    line.split_once(key).map(|(_, rest)| rest.trim())
}

fn render_hindsight(md: &mut String, problem: &str, h: &Hindsight) {
    let _ = write!(md, "## {SECTION_PROBLEM}\n\n{problem}\n\n");
    if !h.error_message.is_empty() {
        let _ = write!(md, "## {SECTION_ERROR}\n\n```\n{}\n```\n\n", h.error_message);
    }
    if !h.stack_trace.is_empty() {
        let _ = write!(md, "## {SECTION_TRACE}\n\n```\n{}\n```\n\n", h.stack_trace);
    }
    if !h.attempted_solutions.is_empty() {
        let _ = write!(md, "## {SECTION_ATTEMPTS}\n\n");
        for (i, attempt) in h.attempted_solutions.iter().enumerate() {
            let _ = writeln!(md, "{}. {attempt}", i + 1);
        }
        md.push('\n');
    }
    if let Some(ref resolution) = h.resolution {
        let _ = write!(md, "## {SECTION_RESOLUTION}\n\n{resolution}\n\n");
    }
    if !h.prevention_tips.is_empty() {
        let _ = write!(md, "## {SECTION_TIPS}\n\n");
        for tip in &h.prevention_tips {
            let _ = writeln!(md, "- {tip}");
        }
        md.push('\n');
    }
}

/// Splits a plain note body into content and the optional metadata block.
fn parse_plain_body(body: &str) -> (String, BTreeMap<String, Value>) {
    let body = body.strip_prefix('\n').unwrap_or(body);
    let Some(end) = body.rfind("\n\n---\n") else {
        return (body.trim().to_string(), BTreeMap::new());
    };

    let content = body[..end].to_string();
    let trailer = &body[end..];
    let metadata = trailer
        .split_once("```json\n")
        .and_then(|(_, rest)| rest.split_once("\n```"))
        .and_then(|(json, _)| serde_json::from_str(json).ok())
        .unwrap_or_default();
    (content, metadata)
}

/// Splits a hindsight body into its known sections, in order.
fn parse_hindsight(body: &str) -> (String, Hindsight) {
    let mut starts: Vec<(&str, usize, usize)> = Vec::new();
    let mut cursor = 0;
    for section in HINDSIGHT_SECTIONS {
        let heading = format!("## {section}\n\n");
        if let Some(pos) = body[cursor..].find(&heading) {
            let start = cursor + pos;
            starts.push((section, start, start + heading.len()));
            cursor = start + heading.len();
        }
    }

    let mut sections: BTreeMap<&str, &str> = BTreeMap::new();
    for (i, &(name, _, body_start)) in starts.iter().enumerate() {
        let end = starts.get(i + 1).map_or(body.len(), |next| next.1);
        sections.insert(name, body[body_start..end].trim_end());
    }

    let fenced = |name: &str| {
        sections
            .get(name)
            .map(|s| {
                s.strip_prefix("```\n")
                    .and_then(|s| s.strip_suffix("\n```"))
                    .unwrap_or(s)
                    .to_string()
            })
            .unwrap_or_default()
    };

    let hindsight = Hindsight {
        error_message: fenced(SECTION_ERROR),
        stack_trace: fenced(SECTION_TRACE),
        attempted_solutions: sections
            .get(SECTION_ATTEMPTS)
            .map(|s| {
                s.lines()
                    .filter_map(|line| line.split_once(". ").map(|(_, item)| item.to_string()))
                    .collect()
            })
            .unwrap_or_default(),
        resolution: sections.get(SECTION_RESOLUTION).map(|s| (*s).to_string()),
        prevention_tips: sections
            .get(SECTION_TIPS)
            .map(|s| {
                s.lines()
                    .filter_map(|line| line.strip_prefix("- ").map(str::to_string))
                    .collect()
            })
            .unwrap_or_default(),
    };

    let content = sections
        .get(SECTION_PROBLEM)
        .map(|s| (*s).to_string())
        .unwrap_or_default();
    (content, hindsight)
}

fn insert_at(node: &mut serde_json::Map<String, Value>, parts: &[&str], leaf: Value) {
    match parts {
        [] => {}
        [last] => {
            node.insert((*last).to_string(), leaf);
        }
        [head, rest @ ..] => {
            let child = node
                .entry((*head).to_string())
                .or_insert_with(|| Value::Object(serde_json::Map::new()));
            if !child.is_object() {
                *child = Value::Object(serde_json::Map::new());
            }
            if let Value::Object(map) = child {
                insert_at(map, rest, leaf);
            }
        }
    }
}

/// Strips a trailing `.md` and converts separators to `/`.
fn normalize_path(path: &str) -> String {
    let path = path.replace('\\', "/");
    path.strip_suffix(".md").unwrap_or(&path).trim_matches('/').to_string()
}

/// File-backed, hierarchical note storage.
#[derive(Debug)]
pub struct NoteStore {
    base: PathBuf,
    index: BTreeMap<String, Note>,
}

impl NoteStore {
    /// Opens (creating if needed) the store at `base` and indexes every
    /// `.md` file beneath it.
    pub fn open(base: impl Into<PathBuf>) -> Result<Self, NoteError> {
        let base = base.into();
        fs::create_dir_all(&base)?;

        let mut store = Self {
            base,
            index: BTreeMap::new(),
        };
        store.load_index()?;
        debug!(path = %store.base.display(), notes = store.index.len(), "Opened note store");
        Ok(store)
    }

    pub fn base_path(&self) -> &Path {
        &self.base
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Writes `note` to disk and indexes it. An existing note at the same
    /// path is replaced.
    pub fn create(&mut self, note: Note) -> Result<Note, NoteError> {
        self.write_note(&note)?;
        info!(path = %note.path, note_type = %note.note_type, "Created note");
        self.index.insert(note.path.clone(), note.clone());
        Ok(note)
    }

    /// Convenience for a failure note.
    pub fn create_hindsight(
        &mut self,
        path: &str,
        title: &str,
        problem: &str,
        hindsight: Hindsight,
    ) -> Result<Note, NoteError> {
        self.create(Note::hindsight(path, title, problem, hindsight))
    }

    /// Returns the note at `path`, loading it from disk if it was written
    /// after the store was opened.
    pub fn read(&mut self, path: &str) -> Result<Option<&Note>, NoteError> {
        let key = normalize_path(path);
        if !self.index.contains_key(&key) {
            let file = self.file_path(&key)?;
            if !file.is_file() {
                return Ok(None);
            }
            let text = fs::read_to_string(&file)?;
            self.index
                .insert(key.clone(), Note::from_markdown(&key, &text));
        }
        Ok(self.index.get(&key))
    }

    /// Replaces a note's content and bumps its `updated` timestamp.
    pub fn update(&mut self, path: &str, content: &str) -> Result<Option<Note>, NoteError> {
        let Some(mut note) = self.read(path)?.cloned() else {
            return Ok(None);
        };
        note.content = content.to_string();
        note.updated = Utc::now();
        self.write_note(&note)?;
        self.index.insert(note.path.clone(), note.clone());
        Ok(Some(note))
    }

    /// Deletes a note. Returns false if no file existed.
    pub fn delete(&mut self, path: &str) -> Result<bool, NoteError> {
        let key = normalize_path(path);
        let file = self.file_path(&key)?;
        if !file.is_file() {
            return Ok(false);
        }
        fs::remove_file(&file)?;
        self.index.remove(&key);
        Ok(true)
    }

    /// Filters notes by type, by any-of `tags`, and by a case-insensitive
    /// substring over title and content. Empty filters match everything.
    pub fn search(&self, query: &str, note_type: Option<NoteType>, tags: &[String]) -> Vec<&Note> {
        let query = query.to_lowercase();
        self.index
            .values()
            .filter(|note| note_type.is_none_or(|t| note.note_type == t))
            .filter(|note| tags.is_empty() || tags.iter().any(|t| note.tags.contains(t)))
            .filter(|note| {
                query.is_empty()
                    || format!("{} {}", note.title, note.content)
                        .to_lowercase()
                        .contains(&query)
            })
            .collect()
    }

    /// Hindsight notes whose error message or stack trace contains `pattern`.
    pub fn search_failures(&self, pattern: &str) -> Vec<&Note> {
        let pattern = pattern.to_lowercase();
        self.search("", Some(NoteType::Failure), &[])
            .into_iter()
            .filter(|note| {
                note.hindsight.as_ref().is_some_and(|h| {
                    format!("{} {}", h.error_message, h.stack_trace)
                        .to_lowercase()
                        .contains(&pattern)
                })
            })
            .collect()
    }

    pub fn paths(&self) -> Vec<&str> {
        self.index.keys().map(String::as_str).collect()
    }

    /// Nested object view of the store: directories become objects, notes
    /// become `{title, type}` leaves.
    pub fn hierarchy(&self) -> Value {
        let mut root = serde_json::Map::new();
        for (path, note) in &self.index {
            let parts: Vec<&str> = path.split('/').collect();
            insert_at(
                &mut root,
                &parts,
                serde_json::json!({ "title": note.title, "type": note.note_type }),
            );
        }
        Value::Object(root)
    }

    fn file_path(&self, key: &str) -> Result<PathBuf, NoteError> {
        let relative = Path::new(key);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)));
        if key.is_empty() || escapes {
            return Err(NoteError::InvalidPath(key.to_string()));
        }
        Ok(self.base.join(format!("{key}.md")))
    }

    fn write_note(&self, note: &Note) -> Result<(), NoteError> {
        let file = self.file_path(&note.path)?;
        if let Some(parent) = file.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&file, note.to_markdown())?;
        Ok(())
    }

    fn load_index(&mut self) -> Result<(), NoteError> {
        let mut pending = vec![self.base.clone()];
        while let Some(dir) = pending.pop() {
            for entry in fs::read_dir(&dir)? {
                let path = entry?.path();
                if path.is_dir() {
                    pending.push(path);
                    continue;
                }
                if path.extension().is_none_or(|ext| ext != "md") {
                    continue;
                }
                let Ok(relative) = path.strip_prefix(&self.base) else {
                    continue;
                };
                let key = normalize_path(&relative.to_string_lossy());
                match fs::read_to_string(&path) {
                    Ok(text) => {
                        self.index.insert(key.clone(), Note::from_markdown(&key, &text));
                    }
                    Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable note"),
                }
            }
        }
        Ok(())
    }
}

/// Kind of a session event fed to the note taker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Decision,
    Output,
    ActionFailed,
}

/// One entry of a flattened session trajectory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionEvent {
    pub iteration: u32,
    pub kind: EventKind,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SessionEvent {
    pub fn new(iteration: u32, kind: EventKind, content: impl Into<String>) -> Self {
        Self {
            iteration,
            kind,
            content: content.into(),
            action: None,
            error: None,
        }
    }

    pub fn failed(iteration: u32, action: impl Into<String>, error: impl Into<String>) -> Self {
        let error = error.into();
        Self {
            iteration,
            kind: EventKind::ActionFailed,
            content: error.clone(),
            action: Some(action.into()),
            error: Some(error),
        }
    }

    fn is_failure(&self) -> bool {
        self.error.is_some() || self.content.to_lowercase().contains("exception")
    }
}

/// How far past a failure to look for the event that resolved it.
const RESOLUTION_LOOKAHEAD: usize = 10;

/// Turns a finished session into decision, failure and summary notes.
pub struct NoteTaker<'a> {
    store: &'a mut NoteStore,
}

impl<'a> NoteTaker<'a> {
    pub fn new(store: &'a mut NoteStore) -> Self {
        Self { store }
    }

    /// Writes `<session>/decisions`, one `<session>/failures/failure_<i>`
    /// per failure event and `<session>/summary`. Returns the created paths.
    pub fn distill_session(
        &mut self,
        session_id: &str,
        events: &[SessionEvent],
        outcome: &str,
    ) -> Result<Vec<String>, NoteError> {
        let mut created = Vec::new();

        let decisions: Vec<&str> = events
            .iter()
            .filter(|e| e.kind == EventKind::Decision)
            .map(|e| e.content.as_str())
            .collect();
        if !decisions.is_empty() {
            let content = decisions
                .iter()
                .map(|d| format!("- {d}"))
                .collect::<Vec<_>>()
                .join("\n\n");
            let note = Note::new(
                format!("{session_id}/decisions"),
                format!("Decisions from {session_id}"),
                content,
                NoteType::Decision,
            )
            .with_tags(["session", session_id]);
            created.push(self.store.create(note)?.path);
        }

        let failures = events.iter().enumerate().filter(|(_, e)| e.is_failure());
        for (n, (i, event)) in failures.enumerate() {
            let resolution = events
                .iter()
                .skip(i + 1)
                .take(RESOLUTION_LOOKAHEAD)
                .find(|later| later.content.to_lowercase().contains("success"))
                .map(|later| later.content.clone());

            let title = event.action.as_deref().unwrap_or("Unknown action");
            let hindsight = Hindsight {
                error_message: event.error.clone().unwrap_or_default(),
                resolution,
                ..Hindsight::default()
            };
            let note = Note::hindsight(
                format!("{session_id}/failures/failure_{n}"),
                format!("Failure {}: {title}", n + 1),
                format!("Iteration {}: {}", event.iteration, event.content),
                hindsight,
            )
            .with_tags([session_id]);
            created.push(self.store.create(note)?.path);
        }

        let summary = Note::new(
            format!("{session_id}/summary"),
            format!("Session Summary: {session_id}"),
            format!(
                "## Outcome\n\n{outcome}\n\n## Activity\n\n{} recorded events",
                events.len()
            ),
            NoteType::Finding,
        )
        .with_tags(["summary", session_id]);
        created.push(self.store.create(summary)?.path);

        info!(session = session_id, notes = created.len(), "Distilled session notes");
        Ok(created)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_markdown_round_trip() {
        let note = Note::new("arch/overview", "Overview", "Line one\n\nLine two", NoteType::Architecture)
            .with_tags(["core", "design"])
            .with_metadata("owner", "infra");

        let parsed = Note::from_markdown("arch/overview", &note.to_markdown());

        assert_eq!(parsed.title, "Overview");
        assert_eq!(parsed.note_type, NoteType::Architecture);
        assert_eq!(parsed.tags, vec!["core", "design"]);
        assert_eq!(parsed.content, "Line one\n\nLine two");
        assert_eq!(parsed.created, note.created);
        assert_eq!(parsed.updated, note.updated);
        assert_eq!(parsed.metadata.get("owner"), Some(&Value::from("infra")));
    }

    #[test]
    fn test_content_with_separator_round_trips() {
        let note = Note::new("a", "Sep", "above\n\n---\n\nbelow", NoteType::Finding);
        let parsed = Note::from_markdown("a", &note.to_markdown());
        assert_eq!(parsed.content, "above\n\n---\n\nbelow");
    }

    #[test]
    fn test_hindsight_round_trip() {
        let hindsight = Hindsight {
            error_message: "ModuleNotFoundError: foo".to_string(),
            stack_trace: "at line 3".to_string(),
            attempted_solutions: vec!["pip install foo".to_string(), "restart".to_string()],
            resolution: Some("Pinned foo to 1.2".to_string()),
            prevention_tips: vec!["Lock dependencies".to_string()],
        };
        let note = Note::hindsight("f/one", "Import failure", "Import broke", hindsight.clone());

        let md = note.to_markdown();
        assert!(md.contains("**Type:** failure (Hindsight)"));
        let problem = md.find("## Problem Description").unwrap();
        let tips = md.find("## Prevention Tips").unwrap();
        assert!(problem < tips);

        let parsed = Note::from_markdown("f/one", &md);
        assert_eq!(parsed.note_type, NoteType::Failure);
        assert_eq!(parsed.content, "Import broke");
        assert_eq!(parsed.hindsight, Some(hindsight));
        assert_eq!(parsed.tags, vec!["failure", "hindsight"]);
    }

    #[test]
    fn test_from_markdown_is_total() {
        let parsed = Note::from_markdown("x", "no header at all");
        assert_eq!(parsed.note_type, NoteType::Finding);
        assert_eq!(parsed.content, "no header at all");
        assert!(parsed.title.is_empty());
    }

    #[test]
    fn test_store_create_read_update_delete() {
        let dir = TempDir::new().unwrap();
        let mut store = NoteStore::open(dir.path()).unwrap();

        store
            .create(Note::new("topics/rust.md", "Rust", "ownership", NoteType::Research))
            .unwrap();
        assert!(dir.path().join("topics/rust.md").is_file());
        assert_eq!(store.paths(), vec!["topics/rust"]);

        let updated = store.update("topics/rust", "borrowing").unwrap().unwrap();
        assert_eq!(updated.content, "borrowing");
        assert!(updated.updated >= updated.created);

        assert!(store.delete("topics/rust").unwrap());
        assert!(!store.delete("topics/rust").unwrap());
        assert!(store.read("topics/rust").unwrap().is_none());
        assert!(store.update("topics/rust", "x").unwrap().is_none());
    }

    #[test]
    fn test_store_reloads_from_disk() {
        let dir = TempDir::new().unwrap();
        {
            let mut store = NoteStore::open(dir.path()).unwrap();
            store
                .create_hindsight(
                    "s/failures/failure_0",
                    "Timeout",
                    "Build hung",
                    Hindsight {
                        error_message: "connection timed out".to_string(),
                        ..Hindsight::default()
                    },
                )
                .unwrap();
        }

        let store = NoteStore::open(dir.path()).unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.search_failures("TIMED OUT").len(), 1);
        assert!(store.search_failures("segfault").is_empty());
    }

    #[test]
    fn test_read_picks_up_files_written_later() {
        let dir = TempDir::new().unwrap();
        let mut store = NoteStore::open(dir.path()).unwrap();
        let external = Note::new("late", "Late", "arrived", NoteType::Finding);
        fs::write(dir.path().join("late.md"), external.to_markdown()).unwrap();

        let note = store.read("late").unwrap().unwrap();
        assert_eq!(note.content, "arrived");
    }

    #[test]
    fn test_search_filters() {
        let dir = TempDir::new().unwrap();
        let mut store = NoteStore::open(dir.path()).unwrap();
        store
            .create(Note::new("a", "Cache design", "LRU eviction", NoteType::Decision).with_tags(["cache"]))
            .unwrap();
        store
            .create(Note::new("b", "Parser", "handles tags", NoteType::Finding).with_tags(["parser"]))
            .unwrap();

        assert_eq!(store.search("lru", None, &[]).len(), 1);
        assert_eq!(store.search("", Some(NoteType::Finding), &[]).len(), 1);
        assert_eq!(store.search("", None, &["cache".to_string()]).len(), 1);
        assert_eq!(store.search("", None, &[]).len(), 2);
        assert!(store.search("parser", Some(NoteType::Decision), &[]).is_empty());
    }

    #[test]
    fn test_search_tags_match_any() {
        let dir = TempDir::new().unwrap();
        let mut store = NoteStore::open(dir.path()).unwrap();
        store
            .create(Note::new("a", "Cache", "LRU", NoteType::Decision).with_tags(["cache"]))
            .unwrap();
        store
            .create(Note::new("b", "Parser", "tags", NoteType::Finding).with_tags(["parser"]))
            .unwrap();

        let tags = vec!["cache".to_string(), "parser".to_string()];
        assert_eq!(store.search("", None, &tags).len(), 2);
    }

    #[test]
    fn test_path_escape_rejected() {
        let dir = TempDir::new().unwrap();
        let mut store = NoteStore::open(dir.path().join("notes")).unwrap();
        let err = store
            .create(Note::new("../outside", "x", "y", NoteType::Finding))
            .unwrap_err();
        assert!(matches!(err, NoteError::InvalidPath(_)));
    }

    #[test]
    fn test_hierarchy_nests_directories() {
        let dir = TempDir::new().unwrap();
        let mut store = NoteStore::open(dir.path()).unwrap();
        store.create(Note::new("s1/summary", "Sum", "x", NoteType::Finding)).unwrap();
        store.create(Note::new("s1/failures/failure_0", "F", "y", NoteType::Failure)).unwrap();

        let tree = store.hierarchy();
        assert_eq!(tree["s1"]["summary"]["title"], "Sum");
        assert_eq!(tree["s1"]["failures"]["failure_0"]["type"], "failure");
    }

    #[test]
    fn test_distill_session() {
        let dir = TempDir::new().unwrap();
        let mut store = NoteStore::open(dir.path()).unwrap();
        let events = vec![
            SessionEvent::new(1, EventKind::Decision, "Use tokio for IO"),
            SessionEvent::failed(1, "bash_command", "exit status 1"),
            SessionEvent::new(2, EventKind::Output, "Tests pass, success"),
        ];

        let paths = NoteTaker::new(&mut store)
            .distill_session("ralph_session_1", &events, "completed")
            .unwrap();

        assert_eq!(
            paths,
            vec![
                "ralph_session_1/decisions",
                "ralph_session_1/failures/failure_0",
                "ralph_session_1/summary",
            ]
        );
        let failure = store.read("ralph_session_1/failures/failure_0").unwrap().unwrap();
        let hindsight = failure.hindsight.as_ref().unwrap();
        assert_eq!(hindsight.error_message, "exit status 1");
        assert_eq!(hindsight.resolution.as_deref(), Some("Tests pass, success"));
        assert!(failure.title.contains("bash_command"));
    }

    #[test]
    fn test_distill_without_events_writes_summary_only() {
        let dir = TempDir::new().unwrap();
        let mut store = NoteStore::open(dir.path()).unwrap();
        let paths = NoteTaker::new(&mut store)
            .distill_session("s", &[], "max_iterations_reached")
            .unwrap();
        assert_eq!(paths, vec!["s/summary"]);
        let summary = store.read("s/summary").unwrap().unwrap();
        assert!(summary.content.contains("max_iterations_reached"));
    }
}
