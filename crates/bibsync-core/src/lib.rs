//! Core types and pure transformations for bibsync.
//!
//! bibsync keeps a vault of Markdown notes in step with a bibliography
//! export. This crate holds everything that does not touch the outside
//! world:
//!
//! - [`bibtex`]: lenient parsing of the export into a key → fields map
//! - [`diff`]: field-level deltas between two snapshots
//! - [`frontmatter`]: merging a delta into a note's metadata block
//! - [`config`]: the `.bibsync/config.toml` settings
//!
//! ```
//! use bibsync_core::{bibtex, diff, frontmatter, Snapshot};
//!
//! let snapshot = bibtex::parse_bibliography("@article{k1, title={New}}");
//! let delta = diff::diff(&Snapshot::new(), &snapshot);
//! let note = frontmatter::patch("---\ntitle: Old\n---\n# notes", &delta["k1"]);
//! assert_eq!(note, "---\ntitle: New\n---\n# notes");
//! ```

pub mod bibtex;
pub mod config;
pub mod diff;
pub mod error;
pub mod frontmatter;
pub mod types;

pub use config::{BibsyncConfig, CitationServiceConfig, ImportConfig, WatchSettings};
pub use error::{Error, Result};
pub use types::{Delta, FieldMap, ImportRecord, KeyError, RunOutcome, Snapshot};
