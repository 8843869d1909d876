//! Archive manifest format and metadata.
//!
//! The manifest is the self-describing entry of every archive. It is
//! written when the export is finalized and read before anything else on
//! import; the origin URL it records drives the URL rewrite.

use crate::error::{Error, Result};
use crate::options::ExportOptions;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Version of the manifest format.
pub const MANIFEST_VERSION: &str = "1.0.0";

/// Version of the engine writing archives.
pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Complete archive manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    /// Manifest format version
    pub format_version: String,

    /// Engine version that produced the archive
    pub engine_version: String,

    /// Version of the structured store the dump was taken from
    pub store_platform_version: String,

    /// Version of the site platform, when configured
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub site_platform_version: Option<String>,

    /// Base URL of the site at export time
    pub origin_base_url: String,

    /// When the archive was finalized
    pub created_at: DateTime<Utc>,

    /// Name of the site that produced the archive
    pub created_by: String,

    /// Options the export ran with
    pub options_snapshot: ExportOptions,

    /// Dump entry details, absent when the database was not exported
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dump: Option<DumpInfo>,

    #[serde(default)]
    pub statistics: ArchiveStatistics,
}

/// Details of the dump entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DumpInfo {
    /// Entry name inside the archive
    pub entry: String,

    /// Tables dumped
    pub tables: usize,

    /// Rows dumped across all tables
    pub rows: u64,

    /// Size of the dump script in bytes
    pub size_bytes: u64,

    /// Hex-encoded SHA256 of the dump script
    pub sha256: String,
}

/// Statistics about the file trees in the archive.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveStatistics {
    /// Regular files packed
    pub files: u64,

    /// Directories packed
    pub directories: u64,

    /// Uncompressed bytes of packed files
    pub content_bytes: u64,
}

impl Manifest {
    /// Creates a new manifest stamped with the current time.
    pub fn new(
        created_by: impl Into<String>,
        store_platform_version: impl Into<String>,
        origin_base_url: impl Into<String>,
        options_snapshot: ExportOptions,
    ) -> Self {
        Self {
            format_version: MANIFEST_VERSION.to_string(),
            engine_version: ENGINE_VERSION.to_string(),
            store_platform_version: store_platform_version.into(),
            site_platform_version: None,
            origin_base_url: origin_base_url.into(),
            created_at: Utc::now(),
            created_by: created_by.into(),
            options_snapshot,
            dump: None,
            statistics: ArchiveStatistics::default(),
        }
    }

    pub fn with_site_platform_version(mut self, version: Option<String>) -> Self {
        self.site_platform_version = version;
        self
    }

    pub fn with_dump(mut self, dump: DumpInfo) -> Self {
        self.dump = Some(dump);
        self
    }

    pub fn with_statistics(mut self, statistics: ArchiveStatistics) -> Self {
        self.statistics = statistics;
        self
    }

    /// Serializes the manifest to JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| Error::fatal(format!("Failed to serialize manifest: {}", e)))
    }

    /// Deserializes a manifest from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| Error::archive_format(format!("Failed to parse manifest: {}", e)))
    }

    /// Rejects manifests written in an incompatible format.
    ///
    /// Minor and patch revisions only add optional fields, so only the
    /// major component has to match.
    pub fn validate(&self) -> Result<()> {
        let ours = semver::Version::parse(MANIFEST_VERSION)
            .map_err(|e| Error::fatal(format!("Invalid built-in manifest version: {}", e)))?;
        let theirs = semver::Version::parse(&self.format_version).map_err(|_| {
            Error::archive_format(format!(
                "Invalid manifest format version: {}",
                self.format_version
            ))
        })?;

        if theirs.major != ours.major {
            return Err(Error::archive_format(format!(
                "Incompatible manifest version: {} (expected {}.x)",
                self.format_version, ours.major
            )));
        }

        if self.origin_base_url.trim().is_empty() {
            return Err(Error::archive_format("Manifest has no origin_base_url"));
        }

        if let Some(dump) = &self.dump {
            if dump.sha256.len() != 64 || !dump.sha256.chars().all(|c| c.is_ascii_hexdigit()) {
                return Err(Error::archive_format("Manifest dump checksum is malformed"));
            }
        }

        Ok(())
    }
}
