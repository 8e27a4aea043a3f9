//! Annotation change check: which imported items gained or lost annotations
//! in the citation manager since the last check.

use crate::citation::{annotation_fingerprint, CitationService};
use crate::pass::{BatchPacing, PassFlag};
use crate::registry::SharedRegistry;
use bibsync_core::{KeyError, Result, RunOutcome};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Outcome of one change check
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeReport {
    /// Keys whose annotations differ from the cached fingerprint
    pub changed_keys: Vec<String>,
    /// Keys the service returned data for
    pub checked: usize,
    pub errors: Vec<KeyError>,
}

impl ChangeReport {
    pub fn summary(&self) -> String {
        match self.changed_keys.len() {
            0 => format!("No annotation changes ({} checked)", self.checked),
            n => format!("Annotations changed for {} item(s): {}", n, self.changed_keys.join(", ")),
        }
    }
}

pub struct ChangeChecker {
    registry: SharedRegistry,
    service: Arc<dyn CitationService>,
    pacing: BatchPacing,
    in_progress: Arc<PassFlag>,
}

impl ChangeChecker {
    pub fn new(registry: SharedRegistry, service: Arc<dyn CitationService>, pacing: BatchPacing) -> Self {
        Self {
            registry,
            service,
            pacing,
            in_progress: Arc::new(PassFlag::new()),
        }
    }

    /// Share the in-progress flag with other instances, so a rebuilt pass
    /// still waits out one that is already running.
    pub fn with_pass_flag(mut self, flag: Arc<PassFlag>) -> Self {
        self.in_progress = flag;
        self
    }

    pub fn is_running(&self) -> bool {
        self.in_progress.is_active()
    }

    /// Compare every documented item's annotations with the cache.
    ///
    /// An item seen for the first time sets the baseline and is not
    /// reported. Items the service has no data for are skipped.
    pub async fn check_for_changes(&self) -> Result<RunOutcome<ChangeReport>> {
        let Some(_guard) = self.in_progress.try_begin() else {
            debug!("Change check already in progress, dropping trigger");
            return Ok(RunOutcome::AlreadyRunning);
        };

        let (keys, cached) = {
            let registry = self.registry.read().await;
            let keys = registry.documented_keys();
            let cached: Vec<Option<String>> = keys
                .iter()
                .map(|k| registry.annotation_fingerprint(k).map(str::to_string))
                .collect();
            (keys, cached)
        };

        info!("Checking annotations for {} item(s)", keys.len());

        let mut report = ChangeReport::default();
        let mut fingerprints = Vec::new();
        let mut index = 0;

        for (batch_index, batch) in self.pacing.batches(&keys).enumerate() {
            if batch_index > 0 {
                self.pacing.pause().await;
            }

            for key in batch {
                let previous = &cached[index];
                index += 1;

                let attachments = match self.service.attachments(key).await {
                    Ok(Some(attachments)) => attachments,
                    Ok(None) => {
                        debug!("No citation data for {}, skipping", key);
                        continue;
                    }
                    Err(e) => {
                        warn!("Failed to fetch annotations for {}: {}", key, e);
                        report.errors.push(KeyError::new(key.as_str(), e));
                        continue;
                    }
                };

                report.checked += 1;
                let fingerprint = annotation_fingerprint(&attachments);
                match previous {
                    Some(old) if *old == fingerprint => continue,
                    Some(_) => {
                        debug!("Annotations changed for {}", key);
                        report.changed_keys.push(key.clone());
                    }
                    None => debug!("Recording annotation baseline for {}", key),
                }
                fingerprints.push((key.clone(), fingerprint));
            }
        }

        if !fingerprints.is_empty() {
            let mut registry = self.registry.write().await;
            for (key, fingerprint) in fingerprints {
                registry.set_annotation_fingerprint(key, fingerprint);
            }
            registry.save().await?;
        }

        info!(
            "Change check complete: {} changed, {} failed",
            report.changed_keys.len(),
            report.errors.len()
        );

        Ok(RunOutcome::Ran(report))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::citation::{AnnotationRecord, MockCitationService};
    use crate::registry::{Registry, RegistryState};
    use tempfile::TempDir;

    fn highlight(text: &str) -> AnnotationRecord {
        AnnotationRecord {
            id: "A1".to_string(),
            kind: "highlight".to_string(),
            annotation_text: Some(text.to_string()),
            ..Default::default()
        }
    }

    fn setup(imported: &[(&str, &str)]) -> (TempDir, SharedRegistry) {
        let temp = TempDir::new().unwrap();
        let state = RegistryState {
            imported_items: imported
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            ..Default::default()
        };
        let registry = Registry::new(temp.path().join("state.json"), state).into_shared();
        (temp, registry)
    }

    #[tokio::test]
    async fn test_first_check_is_baseline_then_detects_change() {
        let (_temp, registry) = setup(&[("a", "a.md")]);
        let service = Arc::new(MockCitationService::new().with_annotations("a", vec![highlight("one")]));
        let checker = ChangeChecker::new(registry.clone(), service.clone(), BatchPacing::unpaced());

        let first = checker.check_for_changes().await.unwrap().ran().unwrap();
        assert!(first.changed_keys.is_empty());
        assert_eq!(first.checked, 1);
        assert!(registry.read().await.annotation_fingerprint("a").is_some());

        let unchanged = checker.check_for_changes().await.unwrap().ran().unwrap();
        assert!(unchanged.changed_keys.is_empty());

        service.set_annotations("a", vec![highlight("one"), highlight("two")]);
        let changed = checker.check_for_changes().await.unwrap().ran().unwrap();
        assert_eq!(changed.changed_keys, vec!["a".to_string()]);
    }

    #[tokio::test]
    async fn test_placeholders_and_missing_data_are_skipped() {
        let (temp, registry) = setup(&[("a", ""), ("b", "b.md")]);
        let service = Arc::new(MockCitationService::new());
        let checker = ChangeChecker::new(registry.clone(), service, BatchPacing::unpaced());

        let report = checker.check_for_changes().await.unwrap().ran().unwrap();
        assert_eq!(report, ChangeReport::default());
        assert!(!temp.path().join("state.json").exists());
    }

    #[tokio::test]
    async fn test_service_failure_is_per_key() {
        let (_temp, registry) = setup(&[("a", "a.md"), ("b", "b.md")]);
        let service = Arc::new(
            MockCitationService::new()
                .with_failure("a", "connection refused")
                .with_annotations("b", vec![highlight("x")]),
        );
        let checker = ChangeChecker::new(registry.clone(), service, BatchPacing::unpaced());

        let report = checker.check_for_changes().await.unwrap().ran().unwrap();
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].key, "a");
        assert_eq!(report.checked, 1);
        assert!(registry.read().await.annotation_fingerprint("b").is_some());
    }

    #[test]
    fn test_summary() {
        let report = ChangeReport {
            changed_keys: vec!["a".to_string(), "b".to_string()],
            checked: 3,
            errors: vec![],
        };
        assert_eq!(report.summary(), "Annotations changed for 2 item(s): a, b");
    }
}
