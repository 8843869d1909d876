//! Front door for callers: one object per site that starts jobs, answers
//! status polls and manages stored archives.

use crate::context::SiteContext;
use crate::engine::{
    FileStatusStore, JobEngine, JobEngineBuilder, JobStatus, MemoryStatusStore, StatusStore,
    TracingHook,
};
use crate::error::Result;
use crate::library::ArchiveInfo;
use crate::manifest::Manifest;
use crate::options::{ExportOptions, ImportOptions};
use siteport_core::types::StatusBackend;
use siteport_core::SiteportConfig;
use std::path::Path;
use std::sync::Arc;

/// Directory under the archive directory holding file-backed job records
pub const JOBS_DIR: &str = ".jobs";

#[derive(Clone)]
pub struct SiteBackup {
    engine: JobEngine,
}

impl SiteBackup {
    pub fn new(engine: JobEngine) -> Self {
        Self { engine }
    }

    /// Builds the context, status store and engine described by `config`
    pub fn from_config(config: SiteportConfig) -> Result<Self> {
        let context = Arc::new(SiteContext::from_config(config)?);
        let status_store: Arc<dyn StatusStore> = match context.config().jobs().status_backend {
            StatusBackend::Memory => Arc::new(MemoryStatusStore::new()),
            StatusBackend::File => {
                Arc::new(FileStatusStore::new(context.archive_dir().join(JOBS_DIR))?)
            }
        };
        let engine = JobEngineBuilder::new(context)
            .with_status_store(status_store)
            .with_hook(TracingHook)
            .build();
        Ok(Self::new(engine))
    }

    pub fn engine(&self) -> &JobEngine {
        &self.engine
    }

    pub fn context(&self) -> &SiteContext {
        self.engine.context()
    }

    /// Starts an export job
    pub fn export(&self, options: ExportOptions) -> Result<String> {
        self.engine.start_export(options)
    }

    /// Starts an import job from an archive file anywhere on disk
    pub fn import(&self, archive: &Path, options: ImportOptions) -> Result<String> {
        self.engine.start_import(archive, options)
    }

    /// Starts an import job from an archive stored in the library
    pub fn import_stored(&self, name: &str, options: ImportOptions) -> Result<String> {
        let path = self.context().library().archive_path(name)?;
        self.engine.start_import(path, options)
    }

    pub fn status(&self, job_id: &str) -> Result<Option<JobStatus>> {
        self.engine.status(job_id)
    }

    pub fn cancel(&self, job_id: &str) -> bool {
        self.engine.cancel(job_id)
    }

    pub fn list_archives(&self) -> Result<Vec<ArchiveInfo>> {
        self.context().library().list_archives()
    }

    pub fn delete_archive(&self, name: &str) -> Result<bool> {
        self.context().library().delete_archive(name)
    }

    pub fn inspect(&self, name: &str) -> Result<Manifest> {
        self.context().library().inspect(name)
    }

    pub fn add_archive(&self, source: &Path) -> Result<ArchiveInfo> {
        self.context().library().add_archive(source)
    }

    /// Removes archives older than the configured retention period
    pub fn cleanup_old_archives(&self) -> Result<usize> {
        let days = self.context().config().storage().retention_days;
        self.context().library().cleanup_older_than(days)
    }
}
