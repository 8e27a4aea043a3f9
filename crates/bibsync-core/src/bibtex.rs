//! Lenient BibTeX/BibLaTeX reader.
//!
//! This is deliberately not a grammar-complete parser. Exports in the wild
//! carry quirks (unbalanced braces, stray `@comment` blocks, hand edits) and
//! the reader has to keep going past them:
//!
//! - an entry starts at `@<type>{<key>,` and runs to the next such marker;
//!   the key is everything before the first comma, trimmed
//! - a field is `name = {value}` or `name = "value"`, the value ending at the
//!   first closing brace or quote (no nesting, no escapes)
//! - an entry that is not closed, or that has a field with no closing
//!   delimiter, is dropped on its own; the rest of the text still parses
//! - a repeated key replaces the earlier entry

use std::collections::BTreeSet;
use std::sync::OnceLock;

use regex::Regex;
use tracing::debug;

use crate::types::{FieldMap, Snapshot};

/// `@type{key` followed by `,` (an entry with fields) or `}` (a bare key).
/// The key runs to the first comma or closing brace; surrounding space is
/// trimmed by the callers.
fn block_marker() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"@([^\s{@]*)\s*\{\s*([^,}]+?)\s*([,}])").expect("block marker pattern")
    })
}

/// `@string`, `@preamble` and `@comment` blocks bound entries but are not
/// entries themselves.
fn is_entry_type(kind: &str) -> bool {
    !["string", "preamble", "comment"]
        .iter()
        .any(|special| kind.eq_ignore_ascii_case(special))
}

fn field_opener() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"([A-Za-z][\w:.-]*)\s*=\s*([{"])"#).expect("field opener pattern")
    })
}

/// Parse a bibliography export into citation key → fields.
///
/// Never fails; malformed entries are skipped and logged at debug level.
pub fn parse_bibliography(text: &str) -> Snapshot {
    // A bare `@type{key}` does not end the region it sits in.
    let markers: Vec<_> = block_marker()
        .captures_iter(text)
        .filter(|caps| {
            let opens_fields = caps.get(3).is_some_and(|t| t.as_str() == ",");
            let special = caps.get(1).is_some_and(|kind| !is_entry_type(kind.as_str()));
            opens_fields || special
        })
        .collect();
    let mut entries = Snapshot::new();

    for (index, caps) in markers.iter().enumerate() {
        let (Some(marker), Some(kind), Some(key), Some(terminator)) =
            (caps.get(0), caps.get(1), caps.get(2), caps.get(3))
        else {
            continue;
        };
        if terminator.as_str() != "," || !is_entry_type(kind.as_str()) {
            continue;
        }
        let end = markers
            .get(index + 1)
            .and_then(|next| next.get(0))
            .map(|next| next.start())
            .unwrap_or(text.len());
        let key = key.as_str().trim();

        match parse_entry_body(&text[marker.end()..end]) {
            Some(fields) => {
                if entries.insert(key.to_string(), fields).is_some() {
                    debug!("Duplicate citation key {}, keeping the later entry", key);
                }
            }
            None => debug!("Skipping malformed entry: {}", key),
        }
    }

    entries
}

/// Extract every citation key, including entries that carry no fields
/// (`@misc{key}`).
///
/// Used to find entries that have never been imported; field content is not
/// inspected, so entries the full parser rejects may still appear here.
pub fn extract_citekeys(text: &str) -> BTreeSet<String> {
    block_marker()
        .captures_iter(text)
        .filter(|caps| caps.get(1).is_some_and(|kind| is_entry_type(kind.as_str())))
        .filter_map(|caps| caps.get(2))
        .map(|key| key.as_str().trim().to_string())
        .collect()
}

/// Parse the text following an entry marker.
///
/// Returns `None` when the entry is not closed or a field value never
/// terminates.
fn parse_entry_body(body: &str) -> Option<FieldMap> {
    if !body.trim_end().ends_with('}') {
        return None;
    }

    let mut fields = FieldMap::new();
    let mut pos = 0;

    while let Some(caps) = field_opener().captures_at(body, pos) {
        let (Some(opener), Some(name), Some(delimiter)) = (caps.get(0), caps.get(1), caps.get(2))
        else {
            break;
        };
        let closing = if delimiter.as_str() == "{" { '}' } else { '"' };
        let value_start = opener.end();
        let value_len = body[value_start..].find(closing)?;

        fields.insert(
            name.as_str().to_lowercase(),
            body[value_start..value_start + value_len].to_string(),
        );
        pos = value_start + value_len + closing.len_utf8();
    }

    Some(fields)
}
