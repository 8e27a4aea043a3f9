//! Sync pass: push bibliography changes into existing notes.
//!
//! ```text
//! bibliography ──parse──▶ new snapshot ──diff (vs registry)──▶ delta
//!                                                              │
//!                    registry ◀── replace snapshot ◀── patch each note
//! ```
//!
//! One failing note never stops the others, and the registry snapshot is
//! replaced once every note has been attempted, whether or not all of them
//! could be patched: the snapshot tracks the bibliography, not the notes.

use crate::document::DocumentStore;
use crate::pass::PassFlag;
use crate::registry::SharedRegistry;
use bibsync_core::{bibtex, diff, frontmatter, Error, FieldMap, KeyError, Result, RunOutcome};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tracing::{debug, info, warn};

/// Outcome of one sync pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Notes whose text was rewritten
    pub updated_count: usize,
    pub updated_paths: Vec<String>,
    /// Changed entries with no note to patch
    pub untracked_keys: Vec<String>,
    /// Per-note failures
    pub errors: Vec<KeyError>,
}

impl SyncReport {
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn summary(&self) -> String {
        match (self.updated_count, self.errors.len()) {
            (0, 0) => "Metadata is up to date".to_string(),
            (n, 0) => format!("Updated metadata in {} note(s)", n),
            (n, e) => format!("Updated metadata in {} note(s), {} failed", n, e),
        }
    }
}

/// Runs sync passes against one bibliography and registry.
pub struct SyncOrchestrator {
    registry: SharedRegistry,
    documents: Arc<dyn DocumentStore>,
    bibliography: Option<PathBuf>,
    in_progress: Arc<PassFlag>,
}

impl SyncOrchestrator {
    pub fn new(
        registry: SharedRegistry,
        documents: Arc<dyn DocumentStore>,
        bibliography: Option<PathBuf>,
    ) -> Self {
        Self {
            registry,
            documents,
            bibliography,
            in_progress: Arc::new(PassFlag::new()),
        }
    }

    /// Share the in-progress flag with other instances, so a rebuilt pass
    /// still waits out one that is already running.
    pub fn with_pass_flag(mut self, flag: Arc<PassFlag>) -> Self {
        self.in_progress = flag;
        self
    }

    pub fn bibliography(&self) -> Option<&Path> {
        self.bibliography.as_deref()
    }

    pub fn is_running(&self) -> bool {
        self.in_progress.is_active()
    }

    /// Run one sync pass.
    ///
    /// Returns [`RunOutcome::AlreadyRunning`] without doing anything when a
    /// pass is already in flight. Fails without touching the registry when
    /// no bibliography is configured or it cannot be read.
    pub async fn run_sync(&self) -> Result<RunOutcome<SyncReport>> {
        let Some(_guard) = self.in_progress.try_begin() else {
            debug!("Sync already in progress, dropping trigger");
            return Ok(RunOutcome::AlreadyRunning);
        };

        let path = self
            .bibliography
            .as_deref()
            .ok_or_else(|| Error::config("bibliography_path is not set"))?;

        info!("Starting sync from {}", path.display());

        let text = fs::read_to_string(path)
            .await
            .map_err(|source| Error::BibliographyRead {
                path: path.to_path_buf(),
                source,
            })?;
        let snapshot = bibtex::parse_bibliography(&text);

        let mut report = SyncReport::default();
        let mut targets: Vec<(String, String, FieldMap)> = Vec::new();
        {
            let registry = self.registry.read().await;
            for (key, fields) in diff::diff(registry.snapshot(), &snapshot) {
                match registry.document_path(&key) {
                    Some(doc) => targets.push((key, doc.to_string(), fields)),
                    None => report.untracked_keys.push(key),
                }
            }
        }

        debug!(
            "{} changed entries with notes, {} without",
            targets.len(),
            report.untracked_keys.len()
        );

        for (key, doc, fields) in targets {
            match self.patch_document(&doc, &fields).await {
                Ok(true) => {
                    debug!("Patched {} ({} fields)", doc, fields.len());
                    report.updated_count += 1;
                    report.updated_paths.push(doc);
                }
                Ok(false) => debug!("Note {} already current", doc),
                Err(e) => {
                    warn!("Failed to patch note for {}: {}", key, e);
                    report.errors.push(KeyError::new(key, e));
                }
            }
        }

        {
            let mut registry = self.registry.write().await;
            registry.replace_snapshot(snapshot);
            registry.save().await?;
        }

        info!(
            "Sync complete: {} updated, {} failed, {} untracked",
            report.updated_count,
            report.errors.len(),
            report.untracked_keys.len()
        );

        Ok(RunOutcome::Ran(report))
    }

    /// Patch one note; `Ok(false)` when the text did not change.
    async fn patch_document(&self, path: &str, fields: &FieldMap) -> Result<bool> {
        if !self.documents.exists(path).await {
            return Err(Error::document(path, "document not found"));
        }

        let original = self.documents.read(path).await?;
        let patched = frontmatter::patch(&original, fields);
        if patched == original {
            return Ok(false);
        }

        self.documents.write(path, &patched).await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::MemoryDocumentStore;
    use crate::registry::{Registry, RegistryState};
    use tempfile::TempDir;

    struct Fixture {
        _temp: TempDir,
        bib: PathBuf,
        registry: SharedRegistry,
        store: Arc<MemoryDocumentStore>,
        orchestrator: SyncOrchestrator,
    }

    fn fixture(bib_text: &str, state: RegistryState, store: MemoryDocumentStore) -> Fixture {
        let temp = TempDir::new().unwrap();
        let bib = temp.path().join("library.bib");
        std::fs::write(&bib, bib_text).unwrap();

        let registry = Registry::new(temp.path().join("state.json"), state).into_shared();
        let store = Arc::new(store);
        let orchestrator =
            SyncOrchestrator::new(registry.clone(), store.clone(), Some(bib.clone()));

        Fixture {
            _temp: temp,
            bib,
            registry,
            store,
            orchestrator,
        }
    }

    fn imported(pairs: &[(&str, &str)]) -> RegistryState {
        RegistryState {
            imported_items: pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_first_sync_patches_all_known_notes() {
        let f = fixture(
            "@article{a, title={A}}\n@article{b, title={B}}",
            imported(&[("a", "a.md")]),
            MemoryDocumentStore::new().with_document("a.md", "body"),
        );

        let report = f.orchestrator.run_sync().await.unwrap().ran().unwrap();

        assert_eq!(report.updated_count, 1);
        assert_eq!(report.untracked_keys, vec!["b".to_string()]);
        assert_eq!(f.store.get("a.md").unwrap(), "---\ntitle: A\n---\nbody");

        let registry = f.registry.read().await;
        assert_eq!(registry.snapshot().len(), 2);
    }

    #[tokio::test]
    async fn test_second_run_writes_nothing() {
        let f = fixture(
            "@article{a, title={A}, year={2001}}",
            imported(&[("a", "a.md")]),
            MemoryDocumentStore::new().with_document("a.md", "# a"),
        );

        f.orchestrator.run_sync().await.unwrap();
        let writes = f.store.write_count();

        let report = f.orchestrator.run_sync().await.unwrap().ran().unwrap();
        assert_eq!(report, SyncReport::default());
        assert_eq!(f.store.write_count(), writes);
    }

    #[tokio::test]
    async fn test_placeholder_import_is_not_patched() {
        let f = fixture(
            "@article{a, title={A}}",
            imported(&[("a", "")]),
            MemoryDocumentStore::new(),
        );

        let report = f.orchestrator.run_sync().await.unwrap().ran().unwrap();
        assert_eq!(report.updated_count, 0);
        assert_eq!(report.untracked_keys, vec!["a".to_string()]);
        assert!(!report.has_errors());
    }

    #[tokio::test]
    async fn test_failing_note_does_not_block_others() {
        let f = fixture(
            "@article{a, title={A}}\n@article{b, title={B}}\n@article{c, title={C}}",
            imported(&[("a", "a.md"), ("b", "b.md"), ("c", "missing.md")]),
            MemoryDocumentStore::new()
                .with_document("a.md", "")
                .with_document("b.md", "")
                .with_read_only("a.md"),
        );

        let report = f.orchestrator.run_sync().await.unwrap().ran().unwrap();

        assert_eq!(report.updated_paths, vec!["b.md".to_string()]);
        let failed: Vec<_> = report.errors.iter().map(|e| e.key.as_str()).collect();
        assert_eq!(failed, vec!["a", "c"]);

        // The snapshot still advances so the failed keys are not retried
        // until the bibliography changes again.
        let registry = f.registry.read().await;
        assert_eq!(registry.snapshot().len(), 3);
    }

    #[tokio::test]
    async fn test_unreadable_bibliography_leaves_registry_untouched() {
        let f = fixture("", imported(&[("a", "a.md")]), MemoryDocumentStore::new());
        std::fs::remove_file(&f.bib).unwrap();

        let err = f.orchestrator.run_sync().await.unwrap_err();
        assert!(matches!(err, Error::BibliographyRead { .. }));

        let registry = f.registry.read().await;
        assert!(registry.snapshot().is_empty());
        assert!(registry.state().last_synced_at.is_none());
        assert!(!registry.path().exists());
    }

    #[tokio::test]
    async fn test_missing_bibliography_setting_is_config_error() {
        let registry = Registry::new("unused.json", RegistryState::default()).into_shared();
        let orchestrator =
            SyncOrchestrator::new(registry, Arc::new(MemoryDocumentStore::new()), None);

        let err = orchestrator.run_sync().await.unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(!orchestrator.is_running());
    }

    #[tokio::test]
    async fn test_trigger_during_pass_is_dropped() {
        let f = fixture("@article{a, title={A}}", imported(&[]), MemoryDocumentStore::new());

        let _held = f.orchestrator.in_progress.try_begin().unwrap();
        let outcome = f.orchestrator.run_sync().await.unwrap();
        assert!(outcome.is_running());

        let registry = f.registry.read().await;
        assert!(registry.snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_rebuilt_orchestrator_honours_shared_flag() {
        let f = fixture("@article{a, title={A}}", imported(&[]), MemoryDocumentStore::new());
        let flag = Arc::new(PassFlag::new());
        let rebuilt = SyncOrchestrator::new(
            f.registry.clone(),
            Arc::new(MemoryDocumentStore::new()),
            Some(f.bib.clone()),
        )
        .with_pass_flag(flag.clone());

        let _held = flag.try_begin().unwrap();
        assert!(rebuilt.is_running());
        assert!(rebuilt.run_sync().await.unwrap().is_running());
    }

    #[test]
    fn test_report_summary() {
        assert_eq!(SyncReport::default().summary(), "Metadata is up to date");
        let report = SyncReport {
            updated_count: 2,
            errors: vec![KeyError::new("k", "boom")],
            ..Default::default()
        };
        assert_eq!(report.summary(), "Updated metadata in 2 note(s), 1 failed");
    }
}
