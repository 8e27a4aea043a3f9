//! Persistent change registry.
//!
//! The registry is the only durable state bibsync keeps: which citation keys
//! have been imported (and into which note), and the bibliography snapshot
//! as of the last sync. It is loaded once, shared as [`SharedRegistry`], and
//! written back in full after every mutation.
//!
//! On disk it is a single JSON document:
//!
//! ```json
//! {
//!   "importedItems": { "smith2020": "notes/smith2020.md" },
//!   "metadataMap": { "smith2020": { "title": "A Title", "year": "2020" } },
//!   "annotationCache": { "smith2020": "9f86d0…" },
//!   "lastSyncedAt": "2024-01-01T12:00:00Z"
//! }
//! ```

use bibsync_core::{Error, ImportRecord, Result, Snapshot};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::RwLock;
use tracing::debug;

/// Registry handle shared by every pass and the daemon.
pub type SharedRegistry = Arc<RwLock<Registry>>;

/// Serialized registry contents.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryState {
    #[serde(default)]
    pub imported_items: ImportRecord,

    #[serde(default)]
    pub metadata_map: Snapshot,

    /// Citation key → fingerprint of its annotations at the last check
    #[serde(default)]
    pub annotation_cache: BTreeMap<String, String>,

    #[serde(default)]
    pub last_synced_at: Option<DateTime<Utc>>,
}

/// The registry and the file it persists to.
#[derive(Debug)]
pub struct Registry {
    path: PathBuf,
    state: RegistryState,
}

impl Registry {
    pub fn new(path: impl Into<PathBuf>, state: RegistryState) -> Self {
        Self {
            path: path.into(),
            state,
        }
    }

    /// Load the registry from `path`; a missing file is an empty registry.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let state = match fs::read(path).await {
            Ok(data) => serde_json::from_slice(&data).map_err(|e| {
                Error::Registry(format!("Cannot parse {}: {}", path.display(), e))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No registry at {}, starting empty", path.display());
                RegistryState::default()
            }
            Err(e) => return Err(e.into()),
        };

        Ok(Self::new(path, state))
    }

    pub fn into_shared(self) -> SharedRegistry {
        Arc::new(RwLock::new(self))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn state(&self) -> &RegistryState {
        &self.state
    }

    pub fn snapshot(&self) -> &Snapshot {
        &self.state.metadata_map
    }

    pub fn imported_items(&self) -> &ImportRecord {
        &self.state.imported_items
    }

    pub fn is_imported(&self, key: &str) -> bool {
        self.state.imported_items.contains_key(key)
    }

    /// Path of the note for `key`, if an import produced one.
    pub fn document_path(&self, key: &str) -> Option<&str> {
        self.state
            .imported_items
            .get(key)
            .map(String::as_str)
            .filter(|path| !path.is_empty())
    }

    /// Keys that have a note, in key order.
    pub fn documented_keys(&self) -> Vec<String> {
        self.state
            .imported_items
            .iter()
            .filter(|(_, path)| !path.is_empty())
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Swap in the snapshot of a completed sync pass.
    pub fn replace_snapshot(&mut self, snapshot: Snapshot) {
        self.state.metadata_map = snapshot;
        self.state.last_synced_at = Some(Utc::now());
    }

    /// Record finished imports. Existing entries are never removed.
    pub fn record_imports(&mut self, imports: impl IntoIterator<Item = (String, String)>) {
        self.state.imported_items.extend(imports);
    }

    pub fn annotation_fingerprint(&self, key: &str) -> Option<&str> {
        self.state.annotation_cache.get(key).map(String::as_str)
    }

    pub fn set_annotation_fingerprint(&mut self, key: String, fingerprint: String) {
        self.state.annotation_cache.insert(key, fingerprint);
    }

    /// Write the whole registry, replacing the previous file atomically.
    pub async fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }

        let data = serde_json::to_vec_pretty(&self.state)?;
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        fs::write(&tmp, data).await?;
        fs::rename(&tmp, &self.path).await?;

        debug!(
            "Saved registry to {} ({} imported, {} tracked)",
            self.path.display(),
            self.state.imported_items.len(),
            self.state.metadata_map.len()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bibsync_core::FieldMap;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_load_missing_file_is_empty() {
        let temp = TempDir::new().unwrap();
        let registry = Registry::load(temp.path().join("state.json")).await.unwrap();
        assert_eq!(registry.state(), &RegistryState::default());
    }

    #[tokio::test]
    async fn test_save_and_reload() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested").join("state.json");

        let mut registry = Registry::load(&path).await.unwrap();
        registry.record_imports([
            ("a".to_string(), "notes/a.md".to_string()),
            ("b".to_string(), String::new()),
        ]);
        let mut fields = FieldMap::new();
        fields.insert("title".to_string(), "A".to_string());
        registry.replace_snapshot(Snapshot::from([("a".to_string(), fields)]));
        registry.save().await.unwrap();

        let reloaded = Registry::load(&path).await.unwrap();
        assert_eq!(reloaded.state(), registry.state());
        assert!(reloaded.state().last_synced_at.is_some());
        assert!(!path.with_file_name("state.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_persisted_layout_uses_camel_case() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("state.json");

        let mut registry = Registry::new(&path, RegistryState::default());
        registry.record_imports([("k".to_string(), "k.md".to_string())]);
        registry.save().await.unwrap();

        let raw: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(raw["importedItems"]["k"], "k.md");
        assert!(raw["metadataMap"].is_object());
    }

    #[tokio::test]
    async fn test_corrupt_file_is_a_registry_error() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("state.json");
        std::fs::write(&path, "{ not json").unwrap();

        let err = Registry::load(&path).await.unwrap_err();
        assert!(matches!(err, Error::Registry(_)));
    }

    #[test]
    fn test_document_path_ignores_placeholders() {
        let mut registry = Registry::new("state.json", RegistryState::default());
        registry.record_imports([
            ("with".to_string(), "notes/with.md".to_string()),
            ("without".to_string(), String::new()),
        ]);

        assert_eq!(registry.document_path("with"), Some("notes/with.md"));
        assert_eq!(registry.document_path("without"), None);
        assert!(registry.is_imported("without"));
        assert_eq!(registry.documented_keys(), vec!["with".to_string()]);
    }

    #[test]
    fn test_legacy_file_without_optional_sections() {
        let state: RegistryState =
            serde_json::from_str(r#"{"importedItems": {"a": "a.md"}}"#).unwrap();
        assert_eq!(state.imported_items["a"], "a.md");
        assert!(state.metadata_map.is_empty());
        assert!(state.annotation_cache.is_empty());
    }
}
