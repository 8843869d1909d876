//! Siteport Backup Engine
//!
//! This crate exports a site (its structured store plus its uploads, themes
//! and plugins trees) into a single portable archive, and imports such an
//! archive into another site, rewriting the origin URL to the destination
//! URL on the way in.
//!
//! # Features
//!
//! - **Archive container**: gzip-compressed tar with a JSON manifest, written
//!   atomically through a partial file
//! - **Structured dump and replay**: statement scripts generated from any
//!   [`StructuredStore`], replayed best-effort statement by statement
//! - **URL migration**: plain, length-prefixed serialized and escaped
//!   occurrences rewritten in one pass with recomputed lengths
//! - **Background jobs**: exports and imports run on the blocking pool and
//!   report progress through pollable status records with a bounded TTL
//! - **Cooperative cancellation**: observed at per-table, per-statement
//!   batch and per-file checkpoints
//!
//! # Examples
//!
//! ```no_run
//! use siteport_backup::{ExportOptions, SiteBackup};
//! use siteport_core::SiteportConfig;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = SiteportConfig::load(None)?;
//!     let backup = SiteBackup::from_config(config)?;
//!
//!     let job = backup.export(ExportOptions::default())?;
//!     let status = backup
//!         .engine()
//!         .wait(&job, Duration::from_millis(500))
//!         .await?;
//!
//!     println!("{:?}", status.map(|s| s.message));
//!     Ok(())
//! }
//! ```

pub mod archive;
pub mod category;
pub mod checksum;
pub mod compatibility;
pub mod context;
pub mod dump;
pub mod engine;
pub mod error;
pub mod filters;
pub mod library;
pub mod load;
pub mod manifest;
pub mod options;
pub mod packager;
pub mod progress;
pub mod rewrite;
pub mod service;
pub mod store;

// Re-export commonly used types
pub use archive::{
    ArchiveReader, ArchiveSummary, ArchiveWriter, ARCHIVE_EXTENSION, DEFAULT_COMPRESSION_LEVEL,
    DUMP_ENTRY, MANIFEST_ENTRY,
};
pub use category::ContentCategory;
pub use compatibility::CompatibilityWarning;
pub use context::SiteContext;
pub use engine::{
    ExportResult, FileStatusStore, ImportSummary, JobEngine, JobEngineBuilder, JobHook, JobKind,
    JobRequest, JobResult, JobState, JobStatus, MemoryStatusStore, NoOpHook, PipelineStep,
    StatusStore, StepContext, TracingHook,
};
pub use error::{Error, ErrorKind, Result};
pub use filters::{FileTreeFilter, ALWAYS_EXCLUDE};
pub use library::{ArchiveInfo, ArchiveLibrary};
pub use load::{Loader, ReplayError, ReplaySummary};
pub use manifest::{Manifest, MANIFEST_VERSION};
pub use options::{ExportOptions, ImportOptions};
pub use progress::{Checkpoint, NoCheckpoint};
pub use rewrite::UrlRewriter;
pub use service::SiteBackup;
pub use store::{SqliteConnector, SqliteStore, StoreConnector, StructuredStore, Value};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
