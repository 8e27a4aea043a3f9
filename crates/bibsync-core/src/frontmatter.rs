//! Merging bibliography fields into a note's metadata block.
//!
//! A note may start with a YAML-style block:
//!
//! ```text
//! ---
//! title: Some Paper
//! tags:
//!   - reading
//! ---
//! # notes
//! ```
//!
//! [`patch`] overwrites or appends the given keys and leaves every other line
//! of the block as the user wrote it. Text after the closing delimiter is
//! never touched. A block that cannot be read is not repaired: a fresh block
//! is placed in front of the whole original text instead.

use crate::types::FieldMap;

const DELIMITER: &str = "---";

/// One top-level unit of a metadata block, stored as the exact source text
/// (line endings included) so untouched entries re-render byte for byte.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Item {
    /// `key: value` plus any indented or list continuation lines.
    Field { key: String, raw: String },
    Comment(String),
    Blank(String),
}

impl Item {
    fn raw(&self) -> &str {
        match self {
            Item::Field { raw, .. } | Item::Comment(raw) | Item::Blank(raw) => raw,
        }
    }
}

/// Parsed metadata block of a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataBlock {
    opening: String,
    closing: String,
    items: Vec<Item>,
}

impl MetadataBlock {
    fn empty(newline: &str) -> Self {
        Self {
            opening: format!("{DELIMITER}{newline}"),
            closing: format!("{DELIMITER}{newline}"),
            items: Vec::new(),
        }
    }

    fn newline(&self) -> &'static str {
        if self.opening.ends_with("\r\n") {
            "\r\n"
        } else {
            "\n"
        }
    }

    /// Keys in block order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.items.iter().filter_map(|item| match item {
            Item::Field { key, .. } => Some(key.as_str()),
            _ => None,
        })
    }

    /// Decoded inline value of `key`, if present.
    pub fn get(&self, key: &str) -> Option<String> {
        self.items.iter().find_map(|item| match item {
            Item::Field { key: k, raw } if k == key => Some(inline_value(raw)),
            _ => None,
        })
    }

    /// All keys with their decoded inline values.
    pub fn fields(&self) -> FieldMap {
        let mut fields = FieldMap::new();
        for item in &self.items {
            if let Item::Field { key, raw } = item {
                fields.entry(key.clone()).or_insert_with(|| inline_value(raw));
            }
        }
        fields
    }

    /// Overwrite or append `fields`. Existing keys keep their position;
    /// new keys are appended in iteration order.
    fn merge(&mut self, fields: &FieldMap) {
        let newline = self.newline();

        for (key, value) in fields {
            let line = format!("{}: {}{}", key, encode_value(value), newline);
            let mut seen = false;

            self.items.retain_mut(|item| match item {
                Item::Field { key: k, raw } if k == key => {
                    if seen {
                        // A hand-edited duplicate would shadow the new value.
                        return false;
                    }
                    seen = true;
                    *raw = line.clone();
                    true
                }
                _ => true,
            });

            if !seen {
                self.items.push(Item::Field {
                    key: key.clone(),
                    raw: line,
                });
            }
        }
    }

    fn render(&self) -> String {
        let mut out = String::with_capacity(
            self.opening.len()
                + self.closing.len()
                + self.items.iter().map(|i| i.raw().len()).sum::<usize>(),
        );
        out.push_str(&self.opening);
        for item in &self.items {
            out.push_str(item.raw());
        }
        out.push_str(&self.closing);
        out
    }
}

/// Merge `fields` into the metadata block of `text`.
///
/// Keys not named in `fields` keep their text and position, and everything
/// after the block is returned unchanged. An empty `fields` returns `text`
/// as is.
pub fn patch(text: &str, fields: &FieldMap) -> String {
    if fields.is_empty() {
        return text.to_string();
    }

    let (mut block, body) = match split(text) {
        Some(parts) => parts,
        None => {
            let newline = if text.contains("\r\n") { "\r\n" } else { "\n" };
            (MetadataBlock::empty(newline), text)
        }
    };

    block.merge(fields);

    let mut out = block.render();
    out.push_str(body);
    out
}

/// Read the metadata block of `text`, or `None` when there is none or it is
/// malformed.
pub fn parse_metadata(text: &str) -> Option<MetadataBlock> {
    split(text).map(|(block, _)| block)
}

/// The part of `text` after its metadata block (all of it when there is no
/// readable block).
pub fn body(text: &str) -> &str {
    split(text).map(|(_, body)| body).unwrap_or(text)
}

/// Encode a value for the block: bare when that reads back unchanged,
/// otherwise as a double-quoted string.
pub fn encode_value(value: &str) -> String {
    if is_plain_safe(value) {
        value.to_string()
    } else {
        serde_json::Value::String(value.to_string()).to_string()
    }
}

/// Decode an inline value as written in a block.
pub fn decode_value(raw: &str) -> String {
    let raw = raw.trim();

    if raw.starts_with('"') {
        if let Ok(value) = serde_json::from_str::<String>(raw) {
            return value;
        }
    } else if raw.len() >= 2 && raw.starts_with('\'') && raw.ends_with('\'') {
        return raw[1..raw.len() - 1].replace("''", "'");
    }

    match raw.find(" #") {
        Some(comment) => raw[..comment].trim_end().to_string(),
        None => raw.to_string(),
    }
}

fn is_plain_safe(value: &str) -> bool {
    const INDICATORS: &[char] = &[
        '-', '?', ':', ',', '[', ']', '{', '}', '#', '&', '*', '!', '|', '>', '\'', '"', '%',
        '@', '`',
    ];
    const RESERVED: &[&str] = &["true", "false", "null", "~", "yes", "no", "on", "off"];

    let Some(first) = value.chars().next() else {
        return false;
    };

    value == value.trim()
        && !INDICATORS.contains(&first)
        && !value.chars().any(char::is_control)
        && !value.contains(": ")
        && !value.contains(" #")
        && !value.ends_with(':')
        && !RESERVED.contains(&value.to_ascii_lowercase().as_str())
}

fn strip_eol(line: &str) -> &str {
    let line = line.strip_suffix('\n').unwrap_or(line);
    line.strip_suffix('\r').unwrap_or(line)
}

fn inline_value(raw: &str) -> String {
    let first = raw.split_inclusive('\n').next().unwrap_or(raw);
    let (_, value) = strip_eol(first).split_once(':').unwrap_or(("", ""));
    decode_value(value)
}

fn unquote_key(key: &str) -> &str {
    let key = key.trim();
    for quote in ['"', '\''] {
        if key.len() >= 2 && key.starts_with(quote) && key.ends_with(quote) {
            return &key[1..key.len() - 1];
        }
    }
    key
}

/// Split `text` into its metadata block and the remaining body.
fn split(text: &str) -> Option<(MetadataBlock, &str)> {
    let mut lines = text.split_inclusive('\n');
    let opening = lines.next()?;
    if strip_eol(opening).trim_end() != DELIMITER || !opening.ends_with('\n') {
        return None;
    }

    let mut offset = opening.len();
    let mut items = Vec::new();

    for line in lines {
        offset += line.len();
        if strip_eol(line).trim_end() == DELIMITER {
            let block = MetadataBlock {
                opening: opening.to_string(),
                closing: line.to_string(),
                items,
            };
            return Some((block, &text[offset..]));
        }
        push_line(&mut items, line)?;
    }

    None
}

fn push_line(items: &mut Vec<Item>, line: &str) -> Option<()> {
    let content = strip_eol(line);

    if content.trim().is_empty() {
        items.push(Item::Blank(line.to_string()));
        return Some(());
    }

    let continuation = content.starts_with(char::is_whitespace)
        || content == "-"
        || content.starts_with("- ");
    if continuation {
        let field_at = items
            .iter()
            .rposition(|item| matches!(item, Item::Field { .. }))?;
        let trailing: String = items.drain(field_at + 1..).map(|i| i.raw().to_string()).collect();
        if let Some(Item::Field { raw, .. }) = items.last_mut() {
            raw.push_str(&trailing);
            raw.push_str(line);
        }
        return Some(());
    }

    if content.starts_with('#') {
        items.push(Item::Comment(line.to_string()));
        return Some(());
    }

    let (key, rest) = content.split_once(':')?;
    let key = unquote_key(key);
    if key.is_empty() || !(rest.is_empty() || rest.starts_with(char::is_whitespace)) {
        return None;
    }

    items.push(Item::Field {
        key: key.to_string(),
        raw: line.to_string(),
    });
    Some(())
}
