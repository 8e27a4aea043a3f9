//! New-entry import: materialize notes for citation keys never seen before.
//!
//! The import itself is delegated to an [`ImportCollaborator`] (normally an
//! external command). This module only decides which keys are new, paces the
//! calls, and records the results in the registry in one write.

use crate::pass::{BatchPacing, PassFlag};
use crate::registry::SharedRegistry;
use async_trait::async_trait;
use bibsync_core::{bibtex, Error, KeyError, Result, RunOutcome};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::fs;
use tokio::process::Command;
use tracing::{debug, info, instrument, warn};

/// Creates the note(s) for one citation key.
#[async_trait]
pub trait ImportCollaborator: Send + Sync {
    /// Import `citekey`, returning the paths of the documents produced.
    async fn import(&self, citekey: &str) -> Result<Vec<PathBuf>>;
}

/// Runs an external program once per citation key.
///
/// `{citekey}` and `{output_dir}` in the arguments are substituted. Every
/// non-empty line the program prints on stdout is taken as a produced path.
#[derive(Debug, Clone)]
pub struct CommandImporter {
    program: String,
    args: Vec<String>,
    output_dir: PathBuf,
}

impl CommandImporter {
    pub fn new(program: impl Into<String>, args: Vec<String>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args,
            output_dir: output_dir.into(),
        }
    }

    fn expand_args(&self, citekey: &str) -> Vec<String> {
        let output_dir = self.output_dir.to_string_lossy();
        self.args
            .iter()
            .map(|arg| {
                arg.replace("{citekey}", citekey)
                    .replace("{output_dir}", &output_dir)
            })
            .collect()
    }
}

#[async_trait]
impl ImportCollaborator for CommandImporter {
    #[instrument(skip(self), fields(program = %self.program))]
    async fn import(&self, citekey: &str) -> Result<Vec<PathBuf>> {
        let args = self.expand_args(citekey);
        debug!("Executing {} {:?}", self.program, args);

        let output = Command::new(&self.program)
            .args(&args)
            .output()
            .await
            .map_err(|e| Error::Collaborator {
                key: citekey.to_string(),
                message: format!("Failed to execute {}: {}", self.program, e),
            })?;

        if !output.status.success() {
            return Err(Error::Collaborator {
                key: citekey.to_string(),
                message: format!(
                    "{} exited with {}: {}",
                    self.program,
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(PathBuf::from)
            .collect())
    }
}

/// Mock collaborator for testing
#[derive(Debug, Default)]
pub struct MockImporter {
    responses: HashMap<String, std::result::Result<Vec<PathBuf>, String>>,
    calls: Mutex<Vec<String>>,
}

impl MockImporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_paths(mut self, citekey: &str, paths: &[&str]) -> Self {
        self.responses.insert(
            citekey.to_string(),
            Ok(paths.iter().map(PathBuf::from).collect()),
        );
        self
    }

    pub fn with_failure(mut self, citekey: &str, message: &str) -> Self {
        self.responses
            .insert(citekey.to_string(), Err(message.to_string()));
        self
    }

    /// Keys imported so far, in call order.
    pub fn calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ImportCollaborator for MockImporter {
    async fn import(&self, citekey: &str) -> Result<Vec<PathBuf>> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(citekey.to_string());
        }

        match self.responses.get(citekey) {
            Some(Ok(paths)) => Ok(paths.clone()),
            Some(Err(message)) => Err(Error::Collaborator {
                key: citekey.to_string(),
                message: message.clone(),
            }),
            None => Ok(vec![PathBuf::from(format!("{}.md", citekey))]),
        }
    }
}

/// Outcome of one import pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportReport {
    /// Keys handed to the collaborator, in order
    pub attempted: Vec<String>,
    /// First document produced per successful key
    pub created_paths: Vec<String>,
    pub errors: Vec<KeyError>,
}

impl ImportReport {
    pub fn summary(&self) -> String {
        match (self.attempted.len(), self.errors.len()) {
            (0, _) => "No new citations".to_string(),
            (n, 0) => format!("Imported {} new citation(s)", n),
            (n, e) => format!("Imported {} of {} new citation(s)", n - e, n),
        }
    }
}

/// Finds and imports citation keys missing from the registry.
pub struct NewEntryImporter {
    registry: SharedRegistry,
    collaborator: Option<Arc<dyn ImportCollaborator>>,
    bibliography: Option<PathBuf>,
    pacing: BatchPacing,
    in_progress: Arc<PassFlag>,
}

impl NewEntryImporter {
    pub fn new(
        registry: SharedRegistry,
        collaborator: Option<Arc<dyn ImportCollaborator>>,
        bibliography: Option<PathBuf>,
        pacing: BatchPacing,
    ) -> Self {
        Self {
            registry,
            collaborator,
            bibliography,
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

    pub fn bibliography(&self) -> Option<&Path> {
        self.bibliography.as_deref()
    }

    pub fn is_running(&self) -> bool {
        self.in_progress.is_active()
    }

    /// Keys in the bibliography that have no import record, ascending.
    pub async fn pending_keys(&self) -> Result<Vec<String>> {
        let path = self.require_bibliography()?;
        let text = read_bibliography(path).await?;
        let all = bibtex::extract_citekeys(&text);

        let registry = self.registry.read().await;
        Ok(all
            .into_iter()
            .filter(|key| !registry.is_imported(key))
            .collect())
    }

    /// Import every new citation key.
    ///
    /// Collaborator failures are collected per key and the loop continues;
    /// the registry is written once at the end.
    pub async fn import_new(&self) -> Result<RunOutcome<ImportReport>> {
        let Some(_guard) = self.in_progress.try_begin() else {
            debug!("Import already in progress, dropping trigger");
            return Ok(RunOutcome::AlreadyRunning);
        };

        self.require_bibliography()?;
        let collaborator = self
            .collaborator
            .as_ref()
            .ok_or_else(|| Error::config("no import command configured"))?;

        let new_keys = self.pending_keys().await?;
        let mut report = ImportReport::default();

        if new_keys.is_empty() {
            debug!("No new citation keys");
            return Ok(RunOutcome::Ran(report));
        }

        info!("Importing {} new citation key(s)", new_keys.len());

        let mut recorded = Vec::new();
        for (index, batch) in self.pacing.batches(&new_keys).enumerate() {
            if index > 0 {
                self.pacing.pause().await;
            }

            for key in batch {
                report.attempted.push(key.clone());
                match collaborator.import(key).await {
                    Ok(paths) => {
                        let produced = paths
                            .into_iter()
                            .next()
                            .map(|p| p.to_string_lossy().into_owned())
                            .unwrap_or_default();
                        if produced.is_empty() {
                            debug!("Import of {} produced no document", key);
                        } else {
                            debug!("Imported {} -> {}", key, produced);
                            report.created_paths.push(produced.clone());
                        }
                        recorded.push((key.clone(), produced));
                    }
                    Err(e) => {
                        warn!("Failed to import {}: {}", key, e);
                        report.errors.push(KeyError::new(key.as_str(), e));
                    }
                }
            }
        }

        if !recorded.is_empty() {
            let mut registry = self.registry.write().await;
            registry.record_imports(recorded);
            registry.save().await?;
        }

        info!(
            "Import complete: {} created, {} failed",
            report.created_paths.len(),
            report.errors.len()
        );

        Ok(RunOutcome::Ran(report))
    }

    fn require_bibliography(&self) -> Result<&Path> {
        self.bibliography
            .as_deref()
            .ok_or_else(|| Error::config("bibliography_path is not set"))
    }
}

async fn read_bibliography(path: &Path) -> Result<String> {
    fs::read_to_string(path)
        .await
        .map_err(|source| Error::BibliographyRead {
            path: path.to_path_buf(),
            source,
        })
}
