//! TTL-bounded storage for job status records.
//!
//! Records expire after their TTL whether or not anyone polled them; a
//! result that is never collected is lost after expiry.

use super::job::JobStatus;
use crate::error::{Error, IoContext, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Key-value store of job status records with per-record expiry
pub trait StatusStore: Send + Sync {
    /// Inserts or replaces the record, restarting its TTL
    fn put(&self, status: &JobStatus, ttl: Duration) -> Result<()>;

    /// Returns the record unless it is missing or expired
    fn get(&self, id: &str) -> Result<Option<JobStatus>>;

    /// Removes a record, returning whether it existed
    fn remove(&self, id: &str) -> Result<bool>;

    /// Drops expired records, returning how many were removed
    fn purge_expired(&self) -> Result<usize>;
}

struct MemoryEntry {
    status: JobStatus,
    expires_at: Instant,
}

impl MemoryEntry {
    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

/// Process-local status store
#[derive(Default)]
pub struct MemoryStatusStore {
    entries: Mutex<HashMap<String, MemoryEntry>>,
}

impl MemoryStatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, MemoryEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn len(&self) -> usize {
        self.entries().values().filter(|e| !e.is_expired()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Time left before the record expires
    pub fn remaining_ttl(&self, id: &str) -> Option<Duration> {
        self.entries()
            .get(id)
            .filter(|e| !e.is_expired())
            .map(|e| e.expires_at.saturating_duration_since(Instant::now()))
    }
}

impl StatusStore for MemoryStatusStore {
    fn put(&self, status: &JobStatus, ttl: Duration) -> Result<()> {
        self.entries().insert(
            status.id.clone(),
            MemoryEntry {
                status: status.clone(),
                expires_at: expiry_instant(ttl),
            },
        );
        Ok(())
    }

    fn get(&self, id: &str) -> Result<Option<JobStatus>> {
        let mut entries = self.entries();
        match entries.get(id) {
            Some(entry) if entry.is_expired() => {
                entries.remove(id);
                Ok(None)
            }
            Some(entry) => Ok(Some(entry.status.clone())),
            None => Ok(None),
        }
    }

    fn remove(&self, id: &str) -> Result<bool> {
        Ok(self.entries().remove(id).is_some())
    }

    fn purge_expired(&self) -> Result<usize> {
        let mut entries = self.entries();
        let before = entries.len();
        entries.retain(|_, e| !e.is_expired());
        Ok(before - entries.len())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredStatus {
    expires_at: DateTime<Utc>,
    status: JobStatus,
}

/// Status store keeping one JSON file per job, so records survive the
/// process that wrote them
#[derive(Debug, Clone)]
pub struct FileStatusStore {
    dir: PathBuf,
}

impl FileStatusStore {
    /// Uses `dir`, creating it if needed
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| Error::io_at("create", &dir, e))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, id: &str) -> Option<PathBuf> {
        is_valid_job_id(id).then(|| self.dir.join(format!("{}.json", id)))
    }

    fn read_record(path: &Path) -> Result<Option<StoredStatus>> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::io_at("read", path, e)),
        };
        match serde_json::from_str(&content) {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                warn!("Ignoring unreadable status record {}: {}", path.display(), e);
                Ok(None)
            }
        }
    }
}

impl StatusStore for FileStatusStore {
    fn put(&self, status: &JobStatus, ttl: Duration) -> Result<()> {
        let path = self
            .record_path(&status.id)
            .ok_or_else(|| Error::validation(format!("Invalid job id: {}", status.id)))?;
        let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
        let record = StoredStatus {
            expires_at: Utc::now().checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC),
            status: status.clone(),
        };
        let json = serde_json::to_string(&record)
            .map_err(|e| Error::fatal(format!("Failed to serialize job status: {}", e)))?;

        // Readers must never see a half-written record
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json).map_err(|e| Error::io_at("write", &tmp, e))?;
        fs::rename(&tmp, &path).io_context(|| format!("Failed to store status {}", status.id))
    }

    fn get(&self, id: &str) -> Result<Option<JobStatus>> {
        let Some(path) = self.record_path(id) else {
            return Ok(None);
        };
        match Self::read_record(&path)? {
            Some(record) if record.expires_at <= Utc::now() => {
                debug!("Status record {} expired", id);
                let _ = fs::remove_file(&path);
                Ok(None)
            }
            Some(record) => Ok(Some(record.status)),
            None => Ok(None),
        }
    }

    fn remove(&self, id: &str) -> Result<bool> {
        let Some(path) = self.record_path(id) else {
            return Ok(false);
        };
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Error::io_at("remove", &path, e)),
        }
    }

    fn purge_expired(&self) -> Result<usize> {
        let now = Utc::now();
        let mut removed = 0;
        for entry in fs::read_dir(&self.dir).map_err(|e| Error::io_at("read", &self.dir, e))? {
            let path = entry.map_err(|e| Error::io_at("read", &self.dir, e))?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let expired = match Self::read_record(&path)? {
                Some(record) => record.expires_at <= now,
                None => true,
            };
            if expired && fs::remove_file(&path).is_ok() {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

fn expiry_instant(ttl: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(ttl)
        .unwrap_or_else(|| now + Duration::from_secs(u32::MAX as u64))
}

/// Job ids are generated as `<kind>_<hex>`; anything else is rejected
/// before touching the filesystem.
pub fn is_valid_job_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= 128
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}
