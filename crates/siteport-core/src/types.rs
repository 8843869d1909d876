//! Configuration file types (siteport.yaml)

use serde::{Deserialize, Serialize};

/// Default ceiling for archives accepted into storage (2 GiB)
pub const DEFAULT_MAX_ARCHIVE_BYTES: u64 = 2 * 1024 * 1024 * 1024;

/// Default gzip level
pub const DEFAULT_COMPRESSION_LEVEL: u32 = 6;

/// Default retention window for job status records
pub const DEFAULT_STATUS_TTL_SECS: u64 = 3600;

/// Default age after which stored archives are eligible for cleanup
pub const DEFAULT_RETENTION_DAYS: u32 = 30;

/// Root of siteport.yaml
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SiteportConfigFile {
    pub site: SiteConfig,
    pub store: StoreConfig,
    pub storage: StorageConfig,
    pub jobs: JobsConfig,
}

/// The site being backed up or restored into
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SiteConfig {
    /// Human-readable site name, slugified into archive file names
    pub name: String,

    /// Base URL the site is served from
    pub base_url: String,

    /// Directory holding the uploads/, themes/ and plugins/ trees
    pub content_dir: String,

    /// Version of the site platform, compared against archive manifests
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform_version: Option<String>,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            name: "site".to_string(),
            base_url: "http://localhost".to_string(),
            content_dir: "content".to_string(),
            platform_version: None,
        }
    }
}

/// Structured store location
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Path to the SQLite database file
    pub path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: "site.db".to_string(),
        }
    }
}

/// Archive storage settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding finished archives and scratch areas
    pub archive_dir: String,

    /// Largest archive accepted by import or upload
    pub max_archive_bytes: u64,

    /// Gzip level (1-9)
    pub compression_level: u32,

    /// Age in days after which archives are removed by cleanup
    pub retention_days: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            archive_dir: "backups".to_string(),
            max_archive_bytes: DEFAULT_MAX_ARCHIVE_BYTES,
            compression_level: DEFAULT_COMPRESSION_LEVEL,
            retention_days: DEFAULT_RETENTION_DAYS,
        }
    }
}

/// Where job status records are kept
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusBackend {
    #[default]
    Memory,
    File,
}

/// Job engine settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobsConfig {
    /// Seconds a status record survives after its last update
    pub status_ttl_secs: u64,

    pub status_backend: StatusBackend,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            status_ttl_secs: DEFAULT_STATUS_TTL_SECS,
            status_backend: StatusBackend::default(),
        }
    }
}
