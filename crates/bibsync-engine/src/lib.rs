//! bibsync engine - the passes that touch the outside world
//!
//! # Overview
//!
//! Three guarded passes share one [`Registry`](registry::Registry):
//!
//! - [`SyncOrchestrator`]: push changed bibliography fields into existing notes
//! - [`NewEntryImporter`]: create notes for citation keys never seen before
//! - [`ChangeChecker`]: detect annotation changes in the citation manager
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │        CLI / daemon                          │
//! └───────┬──────────────┬───────────────┬───────┘
//!         │              │               │
//! ┌───────▼──────┐ ┌─────▼──────┐ ┌──────▼───────┐
//! │ sync         │ │ import     │ │ changes      │
//! │ DocumentStore│ │ Importer   │ │ CitationSvc  │
//! └───────┬──────┘ └─────┬──────┘ └──────┬───────┘
//!         └──────────────┼───────────────┘
//!                 ┌──────▼───────┐
//!                 │ Registry     │
//!                 │ state.json   │
//!                 └──────────────┘
//! ```
//!
//! A pass triggered while the same pass is in flight is dropped, not queued.
//!
//! # Example Usage
//!
//! ```no_run
//! use bibsync_engine::{FsDocumentStore, Registry, SyncOrchestrator};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = Registry::load(".bibsync/state.json").await?.into_shared();
//! let orchestrator = SyncOrchestrator::new(
//!     registry,
//!     Arc::new(FsDocumentStore::new(".")),
//!     Some("library.bib".into()),
//! );
//!
//! if let Some(report) = orchestrator.run_sync().await?.ran() {
//!     println!("{}", report.summary());
//! }
//! # Ok(())
//! # }
//! ```

pub mod changes;
pub mod citation;
pub mod document;
pub mod import;
pub mod notice;
pub mod pass;
pub mod registry;
pub mod sync;

// Re-export commonly used types
pub use changes::{ChangeChecker, ChangeReport};
pub use citation::{
    annotation_fingerprint, AnnotationRecord, AttachmentRecord, CitationService,
    MockCitationService, RpcCitationService,
};
pub use document::{DocumentStore, FsDocumentStore, MemoryDocumentStore};
pub use import::{CommandImporter, ImportCollaborator, ImportReport, MockImporter, NewEntryImporter};
pub use notice::{LogNotifier, Notifier, SilentNotifier};
pub use pass::{BatchPacing, PassFlag, PassGuard};
pub use registry::{Registry, RegistryState, SharedRegistry};
pub use sync::{SyncOrchestrator, SyncReport};
