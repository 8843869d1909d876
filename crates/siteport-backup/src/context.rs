//! Application context shared by every job.
//!
//! Built once from configuration and passed explicitly; nothing in the
//! engine reaches for process-wide state.

use crate::error::Result;
use crate::library::ArchiveLibrary;
use crate::store::{SqliteConnector, StoreConnector};
use siteport_core::SiteportConfig;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

pub struct SiteContext {
    config: SiteportConfig,
    connector: Arc<dyn StoreConnector>,
    library: ArchiveLibrary,
}

impl SiteContext {
    /// Uses `connector` for the structured store instead of the configured
    /// SQLite file
    pub fn new(config: SiteportConfig, connector: Arc<dyn StoreConnector>) -> Self {
        let library = ArchiveLibrary::new(
            config.archive_dir().into_std_path_buf(),
            config.storage().max_archive_bytes,
        );
        Self {
            config,
            connector,
            library,
        }
    }

    /// Validates the configuration and connects to the configured SQLite store
    pub fn from_config(config: SiteportConfig) -> Result<Self> {
        config.validate()?;
        let connector = SqliteConnector::new(config.store_path().into_std_path_buf());
        Ok(Self::new(config, Arc::new(connector)))
    }

    pub fn config(&self) -> &SiteportConfig {
        &self.config
    }

    pub fn connector(&self) -> &dyn StoreConnector {
        self.connector.as_ref()
    }

    pub fn library(&self) -> &ArchiveLibrary {
        &self.library
    }

    pub fn archive_dir(&self) -> PathBuf {
        self.config.archive_dir().into_std_path_buf()
    }

    pub fn content_dir(&self) -> PathBuf {
        self.config.content_dir().into_std_path_buf()
    }
}

impl fmt::Debug for SiteContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SiteContext")
            .field("site", &self.config.site().name)
            .field("archive_dir", &self.library.dir())
            .finish_non_exhaustive()
    }
}
