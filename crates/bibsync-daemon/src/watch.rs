//! Bibliography file watch coordinator.
//!
//! ```text
//!              start_watching ok
//! Unwatched ───────────────────────▶ Watching { File | Directory }
//!     ▲                                 │   │
//!     │ observer error / stop           │   │ rename or remove:
//!     └─────────────────────────────────┘   │ debounce, re-attach after 1s
//!                                           ▼
//!                                   start_watching again
//! ```
//!
//! Raw events arrive from the `notify` thread over a channel and are turned
//! into [`WatchSignal`]s; the daemon loop feeds them back through
//! [`WatchCoordinator::handle_signal`].

use bibsync_core::{Error, Result, WatchSettings};
use notify::event::ModifyKind;
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Delay before re-attaching after the watched file was renamed or removed.
pub const REATTACH_DELAY: Duration = Duration::from_secs(1);

/// What is being observed for a watched bibliography.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchTarget {
    File,
    /// The containing directory, filtered by file name
    Directory,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchState {
    Unwatched,
    Watching { path: PathBuf, target: WatchTarget },
}

/// Filtered observer event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchSignal {
    Changed,
    Renamed,
    Error(String),
}

/// What the caller should do after a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchAction {
    None,
    Debounce,
    /// Debounce, and call [`WatchCoordinator::reattach`] after [`REATTACH_DELAY`].
    DebounceAndReattach,
}

/// Why settings are being reapplied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconfigureCause {
    /// Explicit settings change
    User,
    /// Settings persisted as part of a finished sync pass; never restarts watching.
    ///
    /// [`Daemon`](crate::Daemon) itself never saves settings after a pass and
    /// only sends [`ReconfigureCause::User`]. Hosts that write their settings
    /// back once a pass finishes (a last-sync timestamp, say) pass this cause
    /// so the save does not tear down and re-arm the watcher it came from.
    SyncCompleted,
}

pub struct WatchCoordinator {
    state: WatchState,
    settings: WatchSettings,
    watcher: Option<RecommendedWatcher>,
    signals: mpsc::UnboundedSender<WatchSignal>,
}

impl WatchCoordinator {
    /// Create an unwatched coordinator and the receiver its signals arrive on.
    pub fn new(settings: WatchSettings) -> (Self, mpsc::UnboundedReceiver<WatchSignal>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let coordinator = Self {
            state: WatchState::Unwatched,
            settings,
            watcher: None,
            signals: tx,
        };
        (coordinator, rx)
    }

    pub fn state(&self) -> &WatchState {
        &self.state
    }

    pub fn settings(&self) -> &WatchSettings {
        &self.settings
    }

    pub fn is_watching(&self) -> bool {
        matches!(self.state, WatchState::Watching { .. })
    }

    /// Watch according to the current settings, if enabled.
    pub fn start(&mut self) -> Result<()> {
        match (self.settings.enabled, self.settings.path.clone()) {
            (true, Some(path)) => self.start_watching(&path).map(|_| ()),
            _ => {
                self.stop_watching();
                Ok(())
            }
        }
    }

    /// Observe `path`, replacing any existing observer.
    ///
    /// The file itself is watched when possible; otherwise its directory,
    /// which must exist.
    pub fn start_watching(&mut self, path: &Path) -> Result<WatchTarget> {
        self.stop_watching();

        let file_name = path
            .file_name()
            .ok_or_else(|| Error::Watcher(format!("{} does not name a file", path.display())))?
            .to_os_string();
        let parent = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        if !parent.is_dir() {
            return Err(Error::Watcher(format!(
                "Directory {} does not exist",
                parent.display()
            )));
        }

        let tx = self.signals.clone();
        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| {
                let signal = match res {
                    Ok(event) => classify(&event, &file_name),
                    Err(e) => Some(WatchSignal::Error(e.to_string())),
                };
                if let Some(signal) = signal {
                    // Receiver gone means the daemon is shutting down.
                    let _ = tx.send(signal);
                }
            },
            Config::default(),
        )
        .map_err(|e| Error::Watcher(e.to_string()))?;

        let target = match watcher.watch(path, RecursiveMode::NonRecursive) {
            Ok(()) => WatchTarget::File,
            Err(e) => {
                debug!(
                    "Cannot watch {} directly ({}), watching {}",
                    path.display(),
                    e,
                    parent.display()
                );
                watcher
                    .watch(&parent, RecursiveMode::NonRecursive)
                    .map_err(|e| Error::Watcher(e.to_string()))?;
                WatchTarget::Directory
            }
        };

        info!("Watching {} ({:?})", path.display(), target);
        self.watcher = Some(watcher);
        self.state = WatchState::Watching {
            path: path.to_path_buf(),
            target,
        };
        Ok(target)
    }

    /// Drop the observer. Returns whether anything was being watched.
    pub fn stop_watching(&mut self) -> bool {
        self.watcher = None;
        match std::mem::replace(&mut self.state, WatchState::Unwatched) {
            WatchState::Watching { path, .. } => {
                debug!("Stopped watching {}", path.display());
                true
            }
            WatchState::Unwatched => false,
        }
    }

    pub fn handle_signal(&mut self, signal: WatchSignal) -> WatchAction {
        match signal {
            WatchSignal::Changed if self.is_watching() => WatchAction::Debounce,
            WatchSignal::Renamed if self.is_watching() => WatchAction::DebounceAndReattach,
            WatchSignal::Changed | WatchSignal::Renamed => {
                debug!("Ignoring event while unwatched");
                WatchAction::None
            }
            WatchSignal::Error(message) => {
                error!("File watcher error: {}", message);
                self.stop_watching();
                WatchAction::None
            }
        }
    }

    /// Re-establish the observer after a rename, if still enabled.
    pub fn reattach(&mut self) -> Result<()> {
        debug!("Re-attaching watcher");
        self.start()
    }

    /// Apply new settings. Returns whether watching was restarted.
    pub fn reconfigure(&mut self, settings: WatchSettings, cause: ReconfigureCause) -> Result<bool> {
        let changed = settings != self.settings;
        self.settings = settings;

        if cause == ReconfigureCause::SyncCompleted {
            debug!("Settings recorded after sync, watcher left as is");
            return Ok(false);
        }

        if !self.settings.enabled || self.settings.path.is_none() {
            if self.stop_watching() {
                info!("Auto-sync disabled, stopped watching");
            }
            return Ok(false);
        }

        if !changed && self.is_watching() {
            return Ok(false);
        }

        if let Err(e) = self.start() {
            warn!("Failed to restart watcher: {}", e);
            return Err(e);
        }
        Ok(true)
    }
}

/// Map a raw event to a signal, ignoring anything not about `file_name`.
fn classify(event: &Event, file_name: &OsStr) -> Option<WatchSignal> {
    if !event
        .paths
        .iter()
        .any(|p| p.file_name() == Some(file_name))
    {
        return None;
    }

    match event.kind {
        EventKind::Modify(ModifyKind::Name(_)) | EventKind::Remove(_) => Some(WatchSignal::Renamed),
        EventKind::Create(_) | EventKind::Modify(_) => Some(WatchSignal::Changed),
        _ => None,
    }
}
