//! bibsync CLI - keep Markdown notes in step with a bibliography export.

use anyhow::{Context, Result};
use bibsync_core::config::CONFIG_DIR;
use bibsync_core::{BibsyncConfig, RunOutcome};
use bibsync_daemon::{Daemon, DaemonServices};
use bibsync_engine::{
    BatchPacing, ChangeChecker, CitationService, CommandImporter, FsDocumentStore,
    ImportCollaborator, NewEntryImporter, Notifier, Registry, RpcCitationService, SharedRegistry,
    SilentNotifier, SyncOrchestrator,
};
use chrono::Local;
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "bibsync")]
#[command(about = "bibsync - Bibliography metadata sync for Markdown notes", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Vault root (defaults to the nearest directory containing .bibsync)
    #[arg(long, global = true)]
    root: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize bibsync in a vault
    Init {
        /// Path to initialize (defaults to current directory)
        path: Option<PathBuf>,

        /// Bibliography export to track
        #[arg(short, long)]
        bibliography: Option<PathBuf>,
    },

    /// Push bibliography changes into existing notes
    Sync,

    /// Create notes for new citation keys
    Import {
        /// List the keys that would be imported without importing them
        #[arg(long)]
        dry_run: bool,
    },

    /// Check the citation manager for annotation changes
    Check,

    /// Watch the bibliography and sync on change
    Watch,

    /// Show registry and configuration status
    Status,
}

/// Prints notifications to the terminal.
struct ConsoleNotifier;

impl Notifier for ConsoleNotifier {
    fn notify(&self, message: &str) {
        println!("{} {}", "bibsync:".cyan().bold(), message);
    }
}

/// A vault root with its loaded configuration.
struct Vault {
    root: PathBuf,
    config: BibsyncConfig,
}

impl Vault {
    fn open(root: Option<PathBuf>) -> Result<Self> {
        let root = match root {
            Some(root) => root,
            None => find_vault_root()?,
        };
        let config = BibsyncConfig::load_or_default(&root)?.resolve_paths(&root);
        debug!("Vault root: {}", root.display());
        Ok(Self { root, config })
    }

    async fn registry(&self) -> Result<SharedRegistry> {
        let registry = Registry::load(&self.config.state_path)
            .await
            .with_context(|| format!("loading {}", self.config.state_path.display()))?;
        Ok(registry.into_shared())
    }

    fn pacing(&self) -> BatchPacing {
        BatchPacing::new(
            self.config.import.batch_size,
            self.config.import.batch_pause(),
        )
    }

    fn collaborator(&self) -> Option<Arc<dyn ImportCollaborator>> {
        let program = self.config.import.program.clone()?;
        Some(Arc::new(CommandImporter::new(
            program,
            self.config.import.args.clone(),
            &self.config.notes_dir,
        )))
    }

    fn citations(&self) -> Result<Arc<dyn CitationService>> {
        Ok(Arc::new(RpcCitationService::new(
            &self.config.citation_service,
        )?))
    }

    fn notifier(&self) -> Arc<dyn Notifier> {
        if self.config.notifications_enabled {
            Arc::new(ConsoleNotifier)
        } else {
            Arc::new(SilentNotifier)
        }
    }
}

/// Walk up from the current directory to the first one holding `.bibsync`.
fn find_vault_root() -> Result<PathBuf> {
    let mut current = env::current_dir()?;

    loop {
        if current.join(CONFIG_DIR).is_dir() {
            return Ok(current);
        }

        match current.parent() {
            Some(parent) => current = parent.to_path_buf(),
            None => {
                return Err(anyhow::anyhow!(
                    "No {} directory found. Run 'bibsync init' to initialize a vault.",
                    CONFIG_DIR
                ));
            }
        }
    }
}

fn print_dropped(pass: &str) {
    println!("{}", format!("⚠ A {} pass is already running", pass).yellow());
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    info!("bibsync CLI starting");

    match cli.command {
        Commands::Init { path, bibliography } => init(path, bibliography),
        Commands::Sync => sync(Vault::open(cli.root)?).await,
        Commands::Import { dry_run } => import(Vault::open(cli.root)?, dry_run).await,
        Commands::Check => check(Vault::open(cli.root)?).await,
        Commands::Watch => watch(Vault::open(cli.root)?).await,
        Commands::Status => status(Vault::open(cli.root)?).await,
    }
}

fn init(path: Option<PathBuf>, bibliography: Option<PathBuf>) -> Result<()> {
    let root = path.unwrap_or_else(|| PathBuf::from("."));
    let config_path = BibsyncConfig::config_path(&root);

    if config_path.exists() {
        println!(
            "{}",
            format!("Already initialized: {}", config_path.display()).yellow()
        );
        return Ok(());
    }

    let config = BibsyncConfig {
        bibliography_path: bibliography,
        ..Default::default()
    };
    let written = config.save(&root)?;

    println!("{}", "✓ Initialized bibsync".green().bold());
    println!("  Config:       {}", written.display());
    match &config.bibliography_path {
        Some(bib) => println!("  Bibliography: {}", bib.display()),
        None => println!(
            "  {}",
            "Set bibliography_path in the config before syncing".yellow()
        ),
    }
    Ok(())
}

async fn sync(vault: Vault) -> Result<()> {
    vault.config.validate()?;
    let orchestrator = SyncOrchestrator::new(
        vault.registry().await?,
        Arc::new(FsDocumentStore::new(&vault.root)),
        vault.config.bibliography_path.clone(),
    );

    println!("{}", "Syncing bibliography metadata...".cyan());
    let RunOutcome::Ran(report) = orchestrator.run_sync().await? else {
        print_dropped("sync");
        return Ok(());
    };

    println!("{}", format!("✓ {}", report.summary()).green().bold());
    for path in &report.updated_paths {
        println!("  {}", path);
    }
    if !report.untracked_keys.is_empty() {
        println!(
            "  Changed entries without notes: {}",
            report.untracked_keys.len().to_string().bright_black()
        );
    }
    if report.has_errors() {
        println!("{}", "⚠ Some notes could not be updated:".yellow().bold());
        for error in &report.errors {
            println!("  {}", error.to_string().bright_red());
        }
    }
    Ok(())
}

async fn import(vault: Vault, dry_run: bool) -> Result<()> {
    vault.config.validate()?;
    let importer = NewEntryImporter::new(
        vault.registry().await?,
        vault.collaborator(),
        vault.config.bibliography_path.clone(),
        vault.pacing(),
    );

    if dry_run {
        let pending = importer.pending_keys().await?;
        if pending.is_empty() {
            println!("{}", "No new citations".yellow());
        }
        for key in pending {
            println!("  {}", key);
        }
        return Ok(());
    }

    println!("{}", "Importing new citations...".cyan());
    let RunOutcome::Ran(report) = importer.import_new().await? else {
        print_dropped("import");
        return Ok(());
    };

    println!("{}", format!("✓ {}", report.summary()).green().bold());
    for path in &report.created_paths {
        println!("  {}", path.bright_green());
    }
    for error in &report.errors {
        println!("  {}", error.to_string().bright_red());
    }
    Ok(())
}

async fn check(vault: Vault) -> Result<()> {
    let checker = ChangeChecker::new(vault.registry().await?, vault.citations()?, vault.pacing());

    println!("{}", "Checking annotations...".cyan());
    let RunOutcome::Ran(report) = checker.check_for_changes().await? else {
        print_dropped("check");
        return Ok(());
    };

    println!("{}", format!("✓ {}", report.summary()).green().bold());
    for error in &report.errors {
        println!("  {}", error.to_string().bright_red());
    }
    Ok(())
}

async fn watch(vault: Vault) -> Result<()> {
    vault.config.validate()?;

    let services = DaemonServices {
        registry: vault.registry().await?,
        documents: Arc::new(FsDocumentStore::new(&vault.root)),
        importer: vault.collaborator(),
        citations: Some(vault.citations()?),
        notifier: vault.notifier(),
    };

    println!("{}", "Watching bibliography...".green());
    if let Some(bib) = &vault.config.bibliography_path {
        println!("  Bibliography: {}", bib.display());
    }
    println!("  Press Ctrl+C to stop");
    println!();

    let daemon = Daemon::new(vault.config, services);
    let handle = daemon.handle();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            println!("\n{}", "Shutting down...".yellow());
            let _ = handle.shutdown().await;
        }
    });

    daemon.run().await?;
    println!("{}", "✓ Stopped".green());
    Ok(())
}

async fn status(vault: Vault) -> Result<()> {
    let registry = vault.registry().await?;
    let registry = registry.read().await;
    let state = registry.state();

    println!("{}", "bibsync status".bold());
    println!("  Root:          {}", vault.root.display());
    println!(
        "  Bibliography:  {}",
        display_or_unset(vault.config.bibliography_path.as_deref())
    );
    println!("  Auto-sync:     {}", vault.config.auto_sync);
    println!("  Imported:      {}", state.imported_items.len());
    println!("  With notes:    {}", registry.documented_keys().len());
    println!("  Tracked:       {}", state.metadata_map.len());
    match state.last_synced_at {
        Some(at) => println!(
            "  Last sync:     {}",
            at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S")
        ),
        None => println!("  Last sync:     {}", "never".bright_black()),
    }

    if let Err(e) = vault.config.validate() {
        println!("{}", format!("⚠ {}", e).yellow());
    }
    Ok(())
}

fn display_or_unset(path: Option<&Path>) -> String {
    path.map(|p| p.display().to_string())
        .unwrap_or_else(|| "unset".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["bibsync", "sync", "--root", "/vault", "-v"]).unwrap();
        assert!(cli.verbose);
        assert_eq!(cli.root, Some(PathBuf::from("/vault")));
        assert!(matches!(cli.command, Commands::Sync));
    }

    #[test]
    fn test_parse_import_dry_run() {
        let cli = Cli::try_parse_from(["bibsync", "import", "--dry-run"]).unwrap();
        assert!(matches!(cli.command, Commands::Import { dry_run: true }));
    }

    #[test]
    fn test_init_writes_config_with_bibliography() {
        let temp = tempfile::TempDir::new().unwrap();
        init(
            Some(temp.path().to_path_buf()),
            Some(PathBuf::from("library.bib")),
        )
        .unwrap();

        let config = BibsyncConfig::load_or_default(temp.path()).unwrap();
        assert_eq!(config.bibliography_path, Some(PathBuf::from("library.bib")));
        assert!(config.auto_sync);
    }

    #[test]
    fn test_vault_without_program_has_no_collaborator() {
        let vault = Vault {
            root: PathBuf::from("."),
            config: BibsyncConfig::default(),
        };
        assert!(vault.collaborator().is_none());
        assert_eq!(display_or_unset(None), "unset");
    }
}
