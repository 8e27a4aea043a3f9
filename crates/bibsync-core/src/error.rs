//! Error types for bibsync.

use std::path::PathBuf;
use thiserror::Error;

/// Error type shared by every bibsync crate.
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// Missing or invalid settings. Raised before any I/O is attempted.
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Cannot read bibliography {}: {source}", path.display())]
    BibliographyRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Document error at {path}: {message}")]
    Document { path: String, message: String },

    #[error("Import of {key} failed: {message}")]
    Collaborator { key: String, message: String },

    #[error("Citation service error: {0}")]
    Rpc(String),

    #[error("File watcher error: {0}")]
    Watcher(String),

    #[error("Registry error: {0}")]
    Registry(String),
}

impl Error {
    pub fn config(message: impl Into<String>) -> Self {
        Error::Config(message.into())
    }

    pub fn document(path: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Error::Document {
            path: path.into(),
            message: message.to_string(),
        }
    }
}

/// Result type alias using the bibsync Error type.
pub type Result<T> = std::result::Result<T, Error>;
