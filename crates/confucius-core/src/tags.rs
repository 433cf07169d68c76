//! Scanner for XML-style directive tags in model output.
//!
//! Handles both paired and self-closing forms:
//! ```text
//! <bash>ls -la</bash>
//! <file_edit path="src/lib.rs">...</file_edit>
//! <search pattern="*.rs" />
//! ```
//!
//! Scanning never fails: malformed or unterminated tags are skipped.

use confucius_proto::Attributes;
use serde_json::Value;
use std::ops::Range;

/// One matched tag span.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct TagMatch {
    /// Byte range of the whole span, opening tag through closing tag.
    pub span: Range<usize>,
    pub attributes: Attributes,
    /// Raw (untrimmed) text between the tags; empty for self-closing tags.
    pub body: String,
}

impl TagMatch {
    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).and_then(Value::as_str)
    }
}

/// Finds all paired `<tag ...>body</tag>` spans in source order.
///
/// Matching is non-greedy: each opening tag pairs with the first closing
/// tag after it. Self-closing forms are ignored.
pub(crate) fn scan_paired(text: &str, tag: &str) -> Vec<TagMatch> {
    let close = format!("</{tag}>");
    let mut matches = Vec::new();
    let mut cursor = 0;

    while let Some((start, open_end, attributes)) = next_opening(text, tag, cursor) {
        if text[..open_end].ends_with("/>") {
            cursor = open_end;
            continue;
        }

        let Some(close_rel) = text[open_end..].find(&close) else {
            cursor = open_end;
            continue;
        };

        let end = open_end + close_rel + close.len();
        matches.push(TagMatch {
            span: start..end,
            attributes,
            body: text[open_end..open_end + close_rel].to_string(),
        });
        cursor = end;
    }

    matches
}

/// Finds all opening (or self-closing) `<tag ...>` spans with no body.
pub(crate) fn scan_openings(text: &str, tag: &str) -> Vec<TagMatch> {
    let mut matches = Vec::new();
    let mut cursor = 0;

    while let Some((start, open_end, attributes)) = next_opening(text, tag, cursor) {
        matches.push(TagMatch {
            span: start..open_end,
            attributes,
            body: String::new(),
        });
        cursor = open_end;
    }

    matches
}

/// Locates the next `<tag` opening at or after `cursor`.
///
/// Returns the start offset, the offset just past `>`, and the parsed
/// attributes.
fn next_opening(text: &str, tag: &str, mut cursor: usize) -> Option<(usize, usize, Attributes)> {
    let open = format!("<{tag}");

    while let Some(rel) = text[cursor..].find(&open) {
        let start = cursor + rel;
        let name_end = start + open.len();

        // `<bash>` and `<bash x="1">` match; `<bashful>` does not
        let boundary = text[name_end..].chars().next();
        if !matches!(boundary, Some(c) if c == '>' || c == '/' || c.is_whitespace()) {
            cursor = name_end;
            continue;
        }

        let gt = find_tag_end(&text[name_end..])?;
        let attributes = parse_attributes(&text[name_end..name_end + gt]);
        return Some((start, name_end + gt + 1, attributes));
    }

    None
}

/// Offset of the `>` closing an opening tag, skipping quoted values.
fn find_tag_end(rest: &str) -> Option<usize> {
    let mut in_quote = false;
    for (idx, c) in rest.char_indices() {
        match c {
            '"' => in_quote = !in_quote,
            '>' if !in_quote => return Some(idx),
            _ => {}
        }
    }
    None
}

/// Parses `key="value"` pairs. Stops at the first malformed pair.
pub(crate) fn parse_attributes(raw: &str) -> Attributes {
    let mut attributes = Attributes::new();
    let mut rest = raw.trim_start();

    loop {
        let name_len = rest
            .find(|c: char| !(c.is_alphanumeric() || c == '_' || c == '-'))
            .unwrap_or(rest.len());
        if name_len == 0 {
            break;
        }
        let name = &rest[..name_len];

        let after_name = rest[name_len..].trim_start();
        let Some(after_eq) = after_name.strip_prefix('=') else {
            break;
        };
        let Some(value_start) = after_eq.trim_start().strip_prefix('"') else {
            break;
        };
        let Some(value_end) = value_start.find('"') else {
            break;
        };

        attributes.insert(
            name.to_string(),
            Value::String(value_start[..value_end].to_string()),
        );
        rest = value_start[value_end + 1..].trim_start();
    }

    attributes
}
