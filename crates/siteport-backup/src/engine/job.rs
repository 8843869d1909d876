//! Job records as seen by pollers

use crate::compatibility::CompatibilityWarning;
use crate::error::ErrorKind;
use crate::load::ReplayError;
use crate::options::{ExportOptions, ImportOptions};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// What a job does
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    Export,
    Import,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Export => "export",
            Self::Import => "import",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a job.
///
/// `Starting` moves to `Running` at the first checkpoint. `Completed`,
/// `Error` and `Cancelled` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Starting,
    Running,
    Completed,
    Error,
    Cancelled,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Error | Self::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Error => "error",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a completed export (or of a pre-import rollback archive)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportResult {
    /// File name inside the archive directory
    pub archive_name: String,
    pub path: PathBuf,
    pub size_bytes: u64,
    pub entries: usize,
    pub tables: usize,
    pub rows: u64,
    pub files: u64,
    pub created_at: DateTime<Utc>,
}

/// Outcome of a completed import
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportSummary {
    pub archive_name: String,
    pub origin_url: String,
    pub dest_url: String,
    pub statements_executed: u64,
    pub statements_failed: u64,

    /// First replay failures; the count above is authoritative
    #[serde(default)]
    pub replay_errors: Vec<ReplayError>,

    #[serde(default)]
    pub warnings: Vec<CompatibilityWarning>,

    pub files_restored: u64,

    /// Archive written before anything was changed, when requested
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollback_archive: Option<String>,
}

/// Payload of a completed job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum JobResult {
    Export(ExportResult),
    Import(ImportSummary),
}

impl JobResult {
    pub fn as_export(&self) -> Option<&ExportResult> {
        match self {
            Self::Export(result) => Some(result),
            Self::Import(_) => None,
        }
    }

    pub fn as_import(&self) -> Option<&ImportSummary> {
        match self {
            Self::Import(summary) => Some(summary),
            Self::Export(_) => None,
        }
    }
}

/// Read-only snapshot of a job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatus {
    pub id: String,
    pub kind: JobKind,
    pub status: JobState,

    /// 0-100, never decreasing while running
    pub progress: u8,

    pub message: String,

    /// True only while the job is starting or running
    pub cancellable: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<JobResult>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,

    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobStatus {
    pub fn new(id: impl Into<String>, kind: JobKind) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            kind,
            status: JobState::Starting,
            progress: 0,
            message: "Initializing...".to_string(),
            cancellable: true,
            result: None,
            error_kind: None,
            started_at: now,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Work handed to the engine
#[derive(Debug, Clone)]
pub enum JobRequest {
    Export(ExportOptions),
    Import {
        archive: PathBuf,
        options: ImportOptions,
    },
}

impl JobRequest {
    pub fn kind(&self) -> JobKind {
        match self {
            Self::Export(_) => JobKind::Export,
            Self::Import { .. } => JobKind::Import,
        }
    }
}
