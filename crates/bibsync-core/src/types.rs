//! Data model shared between the parser, differ, registry and passes.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Lower-cased field name → literal field value of one bibliography entry.
pub type FieldMap = BTreeMap<String, String>;

/// Citation key → fields, the whole bibliography as of one parse.
pub type Snapshot = BTreeMap<String, FieldMap>;

/// Citation key → only the fields that were added or modified.
///
/// Never contains an empty field map.
pub type Delta = BTreeMap<String, FieldMap>;

/// Citation key → path of the document that represents it.
///
/// An empty path records an import that produced no file.
pub type ImportRecord = BTreeMap<String, String>;

/// A failure confined to a single citation key or document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyError {
    pub key: String,
    pub message: String,
}

impl KeyError {
    pub fn new(key: impl Into<String>, message: impl fmt::Display) -> Self {
        Self {
            key: key.into(),
            message: message.to_string(),
        }
    }
}

impl fmt::Display for KeyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.key, self.message)
    }
}

/// Result of asking a guarded pass to run.
///
/// Passes never queue: a request made while the same pass is in flight is
/// dropped and reported as [`RunOutcome::AlreadyRunning`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome<T> {
    Ran(T),
    AlreadyRunning,
}

impl<T> RunOutcome<T> {
    pub fn ran(self) -> Option<T> {
        match self {
            RunOutcome::Ran(value) => Some(value),
            RunOutcome::AlreadyRunning => None,
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, RunOutcome::AlreadyRunning)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_error_display() {
        let err = KeyError::new("smith2020", "permission denied");
        assert_eq!(err.to_string(), "smith2020: permission denied");
    }

    #[test]
    fn test_run_outcome_helpers() {
        let ran: RunOutcome<u32> = RunOutcome::Ran(3);
        assert_eq!(ran.clone().ran(), Some(3));
        assert!(!ran.is_running());

        let dropped: RunOutcome<u32> = RunOutcome::AlreadyRunning;
        assert!(dropped.is_running());
        assert_eq!(dropped.ran(), None);
    }
}
