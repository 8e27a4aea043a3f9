//! Configuration management for bibsync
//!
//! Settings live in `.bibsync/config.toml` under the vault root. Every field
//! has a default, so an empty file (or no file at all) is a valid
//! configuration; only the bibliography path has to be filled in before a
//! sync can run.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::{Error, Result};

/// Directory holding config and state, relative to the vault root.
pub const CONFIG_DIR: &str = ".bibsync";

/// Config file name inside [`CONFIG_DIR`].
pub const CONFIG_FILE: &str = "config.toml";

/// Repository-level bibsync configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BibsyncConfig {
    /// Bibliography export to watch (relative paths resolve against the root)
    #[serde(default)]
    pub bibliography_path: Option<PathBuf>,

    /// Watch the bibliography and sync on change
    #[serde(default = "default_true")]
    pub auto_sync: bool,

    /// Quiet period after the last file event before a sync fires
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Surface pass results to the user
    #[serde(default = "default_true")]
    pub notifications_enabled: bool,

    /// Registry file (imported items and last-synced snapshot)
    #[serde(default = "default_state_path")]
    pub state_path: PathBuf,

    /// Directory where imported notes are created
    #[serde(default = "default_notes_dir")]
    pub notes_dir: PathBuf,

    /// Run the new-entry import when the daemon starts
    #[serde(default = "default_true")]
    pub import_on_startup: bool,

    /// Seconds between periodic new-entry imports (0 disables)
    #[serde(default)]
    pub import_interval_secs: u64,

    /// Seconds between periodic annotation checks (0 disables)
    #[serde(default)]
    pub check_interval_secs: u64,

    /// External import command
    #[serde(default)]
    pub import: ImportConfig,

    /// Citation-data service
    #[serde(default)]
    pub citation_service: CitationServiceConfig,
}

/// External command that materializes a note for a citation key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportConfig {
    /// Program to run; imports are disabled when unset
    #[serde(default)]
    pub program: Option<String>,

    /// Arguments; `{citekey}` and `{output_dir}` are substituted
    #[serde(default = "default_import_args")]
    pub args: Vec<String>,

    /// Keys handed to the collaborator before pausing
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Pause between batches
    #[serde(default = "default_batch_pause_ms")]
    pub batch_pause_ms: u64,
}

/// Localhost JSON-RPC endpoint serving attachment and annotation data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CitationServiceConfig {
    #[serde(default = "default_service_url")]
    pub url: String,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// The subset of settings the file watcher reacts to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchSettings {
    pub path: Option<PathBuf>,
    pub enabled: bool,
    pub debounce: Duration,
}

// Default value providers
fn default_true() -> bool {
    true
}

fn default_debounce_ms() -> u64 {
    500
}

fn default_state_path() -> PathBuf {
    PathBuf::from(CONFIG_DIR).join("state.json")
}

fn default_notes_dir() -> PathBuf {
    PathBuf::from("notes")
}

fn default_import_args() -> Vec<String> {
    vec!["{citekey}".to_string()]
}

fn default_batch_size() -> usize {
    10
}

fn default_batch_pause_ms() -> u64 {
    500
}

fn default_service_url() -> String {
    "http://127.0.0.1:23119/better-bibtex/json-rpc".to_string()
}

fn default_timeout_secs() -> u64 {
    10
}

impl BibsyncConfig {
    /// Path of the config file for a vault root.
    pub fn config_path(root: &Path) -> PathBuf {
        root.join(CONFIG_DIR).join(CONFIG_FILE)
    }

    /// Load configuration from `.bibsync/config.toml` or use defaults
    pub fn load_or_default(root: &Path) -> Result<Self> {
        let config_path = Self::config_path(root);

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            Self::from_toml(&content)
        } else {
            Ok(Self::default())
        }
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| Error::config(format!("Failed to parse config file: {}", e)))
    }

    /// Write default configuration to `.bibsync/config.toml`
    pub fn write_default(root: &Path) -> Result<PathBuf> {
        Self::default().save(root)
    }

    /// Write this configuration to `.bibsync/config.toml`
    pub fn save(&self, root: &Path) -> Result<PathBuf> {
        let config_dir = root.join(CONFIG_DIR);
        std::fs::create_dir_all(&config_dir)?;

        let config_path = config_dir.join(CONFIG_FILE);
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(&config_path, content)?;
        Ok(config_path)
    }

    /// Make every relative path absolute with respect to `root`.
    pub fn resolve_paths(mut self, root: &Path) -> Self {
        let resolve = |path: &Path| {
            if path.is_relative() {
                root.join(path)
            } else {
                path.to_path_buf()
            }
        };
        self.bibliography_path = self.bibliography_path.as_deref().map(resolve);
        self.state_path = resolve(&self.state_path);
        self.notes_dir = resolve(&self.notes_dir);
        self
    }

    /// Check the settings that cannot be defaulted.
    pub fn validate(&self) -> Result<()> {
        match &self.bibliography_path {
            None => {
                return Err(Error::config("bibliography_path is not set"));
            }
            Some(path) if path.as_os_str().is_empty() => {
                return Err(Error::config("bibliography_path is empty"));
            }
            Some(_) => {}
        }

        if self.import.batch_size == 0 {
            return Err(Error::config("import.batch_size must be at least 1"));
        }

        if let Some(program) = &self.import.program {
            if program.trim().is_empty() {
                return Err(Error::config("import.program is empty"));
            }
        }

        Ok(())
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn watch_settings(&self) -> WatchSettings {
        WatchSettings {
            path: self.bibliography_path.clone(),
            enabled: self.auto_sync,
            debounce: self.debounce(),
        }
    }
}

impl ImportConfig {
    pub fn batch_pause(&self) -> Duration {
        Duration::from_millis(self.batch_pause_ms)
    }
}

impl CitationServiceConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for BibsyncConfig {
    fn default() -> Self {
        Self {
            bibliography_path: None,
            auto_sync: true,
            debounce_ms: default_debounce_ms(),
            notifications_enabled: true,
            state_path: default_state_path(),
            notes_dir: default_notes_dir(),
            import_on_startup: true,
            import_interval_secs: 0,
            check_interval_secs: 0,
            import: ImportConfig::default(),
            citation_service: CitationServiceConfig::default(),
        }
    }
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            program: None,
            args: default_import_args(),
            batch_size: default_batch_size(),
            batch_pause_ms: default_batch_pause_ms(),
        }
    }
}

impl Default for CitationServiceConfig {
    fn default() -> Self {
        Self {
            url: default_service_url(),
            timeout_secs: default_timeout_secs(),
        }
    }
}
