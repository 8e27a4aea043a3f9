//! Document store abstraction.
//!
//! Notes are addressed by the path string recorded in the registry. The
//! filesystem store resolves relative paths against the vault root; the
//! in-memory store backs tests and dry runs.

use async_trait::async_trait;
use bibsync_core::{Error, Result};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::fs;
use tracing::debug;

/// Read/write access to note text.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn read(&self, path: &str) -> Result<String>;

    async fn write(&self, path: &str, text: &str) -> Result<()>;

    async fn exists(&self, path: &str) -> bool;
}

/// Documents on the local filesystem.
#[derive(Debug, Clone)]
pub struct FsDocumentStore {
    root: PathBuf,
}

impl FsDocumentStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn resolve(&self, path: &str) -> PathBuf {
        let path = Path::new(path);
        if path.is_relative() {
            self.root.join(path)
        } else {
            path.to_path_buf()
        }
    }
}

#[async_trait]
impl DocumentStore for FsDocumentStore {
    async fn read(&self, path: &str) -> Result<String> {
        let full = self.resolve(path);
        debug!("Reading document: {}", full.display());
        fs::read_to_string(&full)
            .await
            .map_err(|e| Error::document(path, e))
    }

    async fn write(&self, path: &str, text: &str) -> Result<()> {
        let full = self.resolve(path);
        debug!("Writing document: {}", full.display());

        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::document(path, e))?;
        }
        fs::write(&full, text)
            .await
            .map_err(|e| Error::document(path, e))
    }

    async fn exists(&self, path: &str) -> bool {
        fs::try_exists(self.resolve(path)).await.unwrap_or(false)
    }
}

/// In-memory document store (for testing and dry runs)
#[derive(Debug, Default)]
pub struct MemoryDocumentStore {
    documents: Mutex<HashMap<String, String>>,
    read_only: HashSet<String>,
    writes: AtomicUsize,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_document(self, path: &str, text: &str) -> Self {
        self.insert(path, text);
        self
    }

    /// Make writes to `path` fail.
    pub fn with_read_only(mut self, path: &str) -> Self {
        self.read_only.insert(path.to_string());
        self
    }

    pub fn insert(&self, path: &str, text: &str) {
        self.lock().insert(path.to_string(), text.to_string());
    }

    pub fn get(&self, path: &str) -> Option<String> {
        self.lock().get(path).cloned()
    }

    /// Number of successful writes so far.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        // A poisoned map is still a valid map of strings.
        self.documents
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn read(&self, path: &str) -> Result<String> {
        self.get(path)
            .ok_or_else(|| Error::document(path, "document not found"))
    }

    async fn write(&self, path: &str, text: &str) -> Result<()> {
        if self.read_only.contains(path) {
            return Err(Error::document(path, "document is read-only"));
        }
        self.insert(path, text);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn exists(&self, path: &str) -> bool {
        self.lock().contains_key(path)
    }
}
