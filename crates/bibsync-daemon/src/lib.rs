//! Background daemon for bibsync.
//!
//! Watches the bibliography and runs the engine passes on a schedule.
//!
//! # Features
//!
//! - **Debouncing**: a burst of bibliography writes produces one sync pass
//!   and one import pass
//! - **Re-attach on rename**: editors that save by replacing the file are followed
//! - **Startup import**: new citation keys are imported once on start
//! - **Periodic passes**: optional import and annotation-check intervals
//! - **Command channel**: on-demand passes, reconfiguration and shutdown through
//!   a cloneable [`DaemonHandle`]
//!
//! Passes run as spawned tasks; each pass type drops triggers that arrive while
//! it is already running.
//!
//! # Example
//!
//! ```no_run
//! use bibsync_core::BibsyncConfig;
//! use bibsync_daemon::{Daemon, DaemonServices};
//! use bibsync_engine::{FsDocumentStore, LogNotifier, Registry};
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let root = Path::new(".");
//! let config = BibsyncConfig::load_or_default(root)?.resolve_paths(root);
//! let services = DaemonServices {
//!     registry: Registry::load(&config.state_path).await?.into_shared(),
//!     documents: Arc::new(FsDocumentStore::new(root)),
//!     importer: None,
//!     citations: None,
//!     notifier: Arc::new(LogNotifier),
//! };
//!
//! let daemon = Daemon::new(config, services);
//! let handle = daemon.handle();
//! tokio::spawn(async move {
//!     tokio::signal::ctrl_c().await.ok();
//!     handle.shutdown().await.ok();
//! });
//! daemon.run().await?;
//! # Ok(())
//! # }
//! ```

pub mod debounce;
pub mod watch;

use bibsync_core::{BibsyncConfig, Error, Result, RunOutcome};
use bibsync_engine::{
    BatchPacing, ChangeChecker, CitationService, DocumentStore, ImportCollaborator,
    NewEntryImporter, Notifier, PassFlag, SharedRegistry, SilentNotifier, SyncOrchestrator,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval_at, sleep_until, Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use watch::{WatchAction, REATTACH_DELAY};

pub use debounce::Debouncer;
pub use watch::{ReconfigureCause, WatchCoordinator, WatchSignal, WatchState, WatchTarget};

/// Requests accepted by a running daemon.
#[derive(Debug, Clone)]
pub enum DaemonCommand {
    SyncNow,
    ImportNow,
    CheckNow,
    Reconfigure(Box<BibsyncConfig>),
    Shutdown,
}

/// Cloneable sender for [`DaemonCommand`]s.
#[derive(Debug, Clone)]
pub struct DaemonHandle {
    tx: mpsc::Sender<DaemonCommand>,
}

impl DaemonHandle {
    pub async fn send(&self, command: DaemonCommand) -> Result<()> {
        self.tx
            .send(command)
            .await
            .map_err(|_| Error::Watcher("daemon is not running".to_string()))
    }

    pub async fn sync_now(&self) -> Result<()> {
        self.send(DaemonCommand::SyncNow).await
    }

    pub async fn import_now(&self) -> Result<()> {
        self.send(DaemonCommand::ImportNow).await
    }

    pub async fn check_now(&self) -> Result<()> {
        self.send(DaemonCommand::CheckNow).await
    }

    pub async fn reconfigure(&self, config: BibsyncConfig) -> Result<()> {
        self.send(DaemonCommand::Reconfigure(Box::new(config))).await
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.send(DaemonCommand::Shutdown).await
    }
}

/// Shared services the daemon's passes are built from.
#[derive(Clone)]
pub struct DaemonServices {
    pub registry: SharedRegistry,
    pub documents: Arc<dyn DocumentStore>,
    pub importer: Option<Arc<dyn ImportCollaborator>>,
    pub citations: Option<Arc<dyn CitationService>>,
    pub notifier: Arc<dyn Notifier>,
}

/// One in-progress flag per pass type, outliving every rebuild of [`Passes`].
#[derive(Default)]
struct PassFlags {
    sync: Arc<PassFlag>,
    import: Arc<PassFlag>,
    check: Arc<PassFlag>,
}

struct Passes {
    sync: Arc<SyncOrchestrator>,
    import: Arc<NewEntryImporter>,
    check: Option<Arc<ChangeChecker>>,
}

impl Passes {
    fn build(config: &BibsyncConfig, services: &DaemonServices, flags: &PassFlags) -> Self {
        let pacing = BatchPacing::new(config.import.batch_size, config.import.batch_pause());
        Self {
            sync: Arc::new(
                SyncOrchestrator::new(
                    services.registry.clone(),
                    services.documents.clone(),
                    config.bibliography_path.clone(),
                )
                .with_pass_flag(flags.sync.clone()),
            ),
            import: Arc::new(
                NewEntryImporter::new(
                    services.registry.clone(),
                    services.importer.clone(),
                    config.bibliography_path.clone(),
                    pacing,
                )
                .with_pass_flag(flags.import.clone()),
            ),
            check: services.citations.clone().map(|service| {
                Arc::new(
                    ChangeChecker::new(services.registry.clone(), service, pacing)
                        .with_pass_flag(flags.check.clone()),
                )
            }),
        }
    }
}

struct Timers {
    import: Option<Interval>,
    check: Option<Interval>,
}

impl Timers {
    fn from_config(config: &BibsyncConfig) -> Self {
        Self {
            import: periodic(config.import_interval_secs),
            check: periodic(config.check_interval_secs),
        }
    }
}

/// Bibliography watcher and pass scheduler.
pub struct Daemon {
    config: BibsyncConfig,
    services: DaemonServices,
    flags: PassFlags,
    passes: Passes,
    commands: mpsc::Receiver<DaemonCommand>,
    handle: DaemonHandle,
}

impl Daemon {
    pub fn new(config: BibsyncConfig, services: DaemonServices) -> Self {
        let (tx, commands) = mpsc::channel(32);
        let flags = PassFlags::default();
        let passes = Passes::build(&config, &services, &flags);
        Self {
            config,
            services,
            flags,
            passes,
            commands,
            handle: DaemonHandle { tx },
        }
    }

    pub fn handle(&self) -> DaemonHandle {
        self.handle.clone()
    }

    pub fn config(&self) -> &BibsyncConfig {
        &self.config
    }

    /// Run until a [`DaemonCommand::Shutdown`] arrives.
    ///
    /// Watcher failures are logged and leave the daemon running unwatched;
    /// passes still run on commands and timers.
    pub async fn run(mut self) -> Result<()> {
        info!("Starting daemon");

        let (mut watch, mut signals) = WatchCoordinator::new(self.config.watch_settings());
        if let Err(e) = watch.start() {
            error!("Failed to start watching: {}", e);
        }

        let mut debouncer = Debouncer::new(self.config.debounce());
        let mut reattach_at: Option<Instant> = None;
        let mut timers = Timers::from_config(&self.config);

        if self.config.import_on_startup {
            info!("Importing new entries on startup");
            self.spawn_import();
        }

        loop {
            tokio::select! {
                Some(signal) = signals.recv() => {
                    match watch.handle_signal(signal) {
                        WatchAction::Debounce => debouncer.poke(),
                        WatchAction::DebounceAndReattach => {
                            debouncer.poke();
                            reattach_at = Some(Instant::now() + REATTACH_DELAY);
                        }
                        WatchAction::None => {}
                    }
                }
                _ = debouncer.expired() => {
                    debug!("Bibliography settled, syncing and importing");
                    self.spawn_sync();
                    self.spawn_import();
                }
                _ = wait_until(reattach_at) => {
                    reattach_at = None;
                    if let Err(e) = watch.reattach() {
                        error!("Failed to re-attach watcher: {}", e);
                    }
                }
                _ = tick(&mut timers.import) => self.spawn_import(),
                _ = tick(&mut timers.check) => self.spawn_check(),
                command = self.commands.recv() => {
                    let Some(command) = command else { break };
                    debug!("Received command: {:?}", command);
                    match command {
                        DaemonCommand::SyncNow => self.spawn_sync(),
                        DaemonCommand::ImportNow => self.spawn_import(),
                        DaemonCommand::CheckNow => self.spawn_check(),
                        DaemonCommand::Reconfigure(config) => {
                            self.apply_config(*config, &mut watch, &mut debouncer, &mut timers);
                        }
                        DaemonCommand::Shutdown => {
                            info!("Received shutdown signal");
                            break;
                        }
                    }
                }
            }
        }

        watch.stop_watching();
        info!("Daemon stopped");
        Ok(())
    }

    fn apply_config(
        &mut self,
        config: BibsyncConfig,
        watch: &mut WatchCoordinator,
        debouncer: &mut Debouncer,
        timers: &mut Timers,
    ) {
        info!("Applying new configuration");

        if config.bibliography_path != self.config.bibliography_path
            || config.import != self.config.import
        {
            // Passes already in flight finish against the old settings and
            // keep the shared flags raised until they do.
            self.passes = Passes::build(&config, &self.services, &self.flags);
        }

        debouncer.set_window(config.debounce());
        if config.import_interval_secs != self.config.import_interval_secs
            || config.check_interval_secs != self.config.check_interval_secs
        {
            *timers = Timers::from_config(&config);
        }

        if let Err(e) = watch.reconfigure(config.watch_settings(), ReconfigureCause::User) {
            error!("Failed to apply watch settings: {}", e);
        }

        self.config = config;
    }

    fn notifier(&self) -> Arc<dyn Notifier> {
        if self.config.notifications_enabled {
            self.services.notifier.clone()
        } else {
            Arc::new(SilentNotifier)
        }
    }

    fn spawn_sync(&self) {
        let orchestrator = self.passes.sync.clone();
        let notifier = self.notifier();

        tokio::spawn(async move {
            match orchestrator.run_sync().await {
                Ok(RunOutcome::Ran(report)) => {
                    for e in &report.errors {
                        warn!("Sync error: {}", e);
                    }
                    if report.updated_count > 0 || report.has_errors() {
                        notifier.notify(&report.summary());
                    }
                }
                Ok(RunOutcome::AlreadyRunning) => debug!("Sync trigger dropped"),
                Err(e) => {
                    error!("Sync failed: {}", e);
                    notifier.notify(&format!("Sync failed: {}", e));
                }
            }
        });
    }

    fn spawn_import(&self) {
        let importer = self.passes.import.clone();
        let notifier = self.notifier();

        tokio::spawn(async move {
            match importer.import_new().await {
                Ok(RunOutcome::Ran(report)) => {
                    if !report.attempted.is_empty() {
                        notifier.notify(&report.summary());
                    }
                }
                Ok(RunOutcome::AlreadyRunning) => debug!("Import trigger dropped"),
                Err(Error::Config(message)) => debug!("Import skipped: {}", message),
                Err(e) => {
                    error!("Import failed: {}", e);
                    notifier.notify(&format!("Import failed: {}", e));
                }
            }
        });
    }

    fn spawn_check(&self) {
        let Some(checker) = self.passes.check.clone() else {
            debug!("No citation service configured, skipping annotation check");
            return;
        };
        let notifier = self.notifier();

        tokio::spawn(async move {
            match checker.check_for_changes().await {
                Ok(RunOutcome::Ran(report)) => {
                    if !report.changed_keys.is_empty() {
                        notifier.notify(&report.summary());
                    }
                }
                Ok(RunOutcome::AlreadyRunning) => debug!("Annotation check trigger dropped"),
                Err(e) => error!("Annotation check failed: {}", e),
            }
        });
    }
}

fn periodic(secs: u64) -> Option<Interval> {
    if secs == 0 {
        return None;
    }
    let period = Duration::from_secs(secs);
    let mut interval = interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    Some(interval)
}

async fn tick(timer: &mut Option<Interval>) {
    match timer {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
