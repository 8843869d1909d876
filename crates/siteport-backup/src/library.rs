//! Completed archives kept in the archive directory.
//!
//! Only regular `*.tar.gz` files directly inside the directory count as
//! archives. Partial files of running exports and hidden scratch areas
//! are ignored.

use crate::archive::{ArchiveReader, ARCHIVE_EXTENSION, PARTIAL_SUFFIX};
use crate::error::{Error, IoContext, Result};
use crate::manifest::Manifest;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use siteport_core::utils::{human_bytes, sanitize_file_name};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// A stored archive
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveInfo {
    pub name: String,
    pub path: PathBuf,
    pub size_bytes: u64,

    /// Modification time of the file
    pub created_at: DateTime<Utc>,
}

/// Directory of stored archives
#[derive(Debug, Clone)]
pub struct ArchiveLibrary {
    dir: PathBuf,
    max_archive_bytes: u64,
}

impl ArchiveLibrary {
    pub fn new(dir: impl Into<PathBuf>, max_archive_bytes: u64) -> Self {
        Self {
            dir: dir.into(),
            max_archive_bytes,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn max_archive_bytes(&self) -> u64 {
        self.max_archive_bytes
    }

    /// Creates the directory if it does not exist yet
    pub fn ensure_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.dir).map_err(|e| Error::io_at("create", &self.dir, e))
    }

    /// Stored archives, newest first
    pub fn list_archives(&self) -> Result<Vec<ArchiveInfo>> {
        if !self.dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut archives = Vec::new();
        let entries = fs::read_dir(&self.dir).map_err(|e| Error::io_at("read", &self.dir, e))?;
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !is_archive_name(&name) {
                continue;
            }
            match self.info(&name, &entry.path()) {
                Ok(Some(info)) => archives.push(info),
                Ok(None) => {}
                Err(e) => warn!("Skipping {}: {}", name, e),
            }
        }

        archives.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| a.name.cmp(&b.name))
        });
        Ok(archives)
    }

    fn info(&self, name: &str, path: &Path) -> Result<Option<ArchiveInfo>> {
        let metadata = fs::metadata(path).map_err(|e| Error::io_at("stat", path, e))?;
        if !metadata.is_file() {
            return Ok(None);
        }
        let modified = metadata
            .modified()
            .map_err(|e| Error::io_at("read modification time of", path, e))?;
        Ok(Some(ArchiveInfo {
            name: name.to_string(),
            path: path.to_path_buf(),
            size_bytes: metadata.len(),
            created_at: DateTime::<Utc>::from(modified),
        }))
    }

    /// Resolves an archive name to its path, rejecting anything that is not
    /// a plain archive file name
    pub fn archive_path(&self, name: &str) -> Result<PathBuf> {
        if name.is_empty() || sanitize_file_name(name) != name || !is_archive_name(name) {
            return Err(Error::validation(format!("Invalid archive name: {}", name)));
        }
        Ok(self.dir.join(name))
    }

    /// Deletes a stored archive, returning false when it does not exist
    pub fn delete_archive(&self, name: &str) -> Result<bool> {
        let path = self.archive_path(name)?;
        match fs::remove_file(&path) {
            Ok(()) => {
                info!("Deleted archive {}", name);
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Error::io_at("delete", &path, e)),
        }
    }

    /// Reads the manifest of a stored archive
    pub fn inspect(&self, name: &str) -> Result<Manifest> {
        let path = self.archive_path(name)?;
        if !path.is_file() {
            return Err(Error::validation(format!("Archive not found: {}", name)));
        }
        Ok(ArchiveReader::open(&path)?.manifest().clone())
    }

    /// Checks that `path` is an importable archive within the size ceiling.
    ///
    /// Returns the opened reader so callers can inspect it further.
    pub fn validate_archive_file(&self, path: &Path) -> Result<ArchiveReader> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if !name.ends_with(ARCHIVE_EXTENSION) {
            return Err(Error::validation(format!(
                "Invalid file type: {} (expected a {} archive)",
                name, ARCHIVE_EXTENSION
            )));
        }

        let metadata = fs::metadata(path).map_err(|e| Error::io_at("stat", path, e))?;
        if !metadata.is_file() {
            return Err(Error::validation(format!("{} is not a file", path.display())));
        }
        if metadata.len() > self.max_archive_bytes {
            return Err(Error::validation(format!(
                "Archive is too large: {} (limit {})",
                human_bytes(metadata.len()),
                human_bytes(self.max_archive_bytes)
            )));
        }

        let reader = ArchiveReader::open(path)?;
        reader.manifest().validate()?;
        Ok(reader)
    }

    /// Validates an archive from outside the library and copies it in
    /// under a fresh `<stem>_uploaded_<timestamp>.tar.gz` name
    pub fn add_archive(&self, source: &Path) -> Result<ArchiveInfo> {
        self.validate_archive_file(source)?;
        self.ensure_dir()?;

        let file_name = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let stem = sanitize_file_name(file_name.trim_end_matches(ARCHIVE_EXTENSION));
        let stem = if stem.is_empty() { "archive".to_string() } else { stem };
        let timestamp = Utc::now().format("%Y-%m-%d_%H-%M-%S");

        let mut name = format!("{}_uploaded_{}{}", stem, timestamp, ARCHIVE_EXTENSION);
        let mut counter = 1;
        while self.dir.join(&name).exists() {
            name = format!(
                "{}_uploaded_{}-{}{}",
                stem, timestamp, counter, ARCHIVE_EXTENSION
            );
            counter += 1;
        }

        let target = self.dir.join(&name);
        let partial = self.dir.join(format!("{}{}", name, PARTIAL_SUFFIX));
        fs::copy(source, &partial).io_context(|| {
            format!(
                "Failed to copy {} into {}",
                source.display(),
                self.dir.display()
            )
        })?;
        if let Err(e) = fs::rename(&partial, &target) {
            let _ = fs::remove_file(&partial);
            return Err(Error::io_at("store", &target, e));
        }

        info!("Added archive {}", name);
        self.info(&name, &target)?
            .ok_or_else(|| Error::fatal(format!("{} vanished after copy", target.display())))
    }

    /// Deletes archives last modified more than `days` days ago.
    ///
    /// Returns the number of archives removed. Failures on individual files
    /// are logged but do not fail the whole cleanup.
    pub fn cleanup_older_than(&self, days: u32) -> Result<usize> {
        let cutoff = Utc::now() - chrono::Duration::days(i64::from(days));
        let mut removed = 0;

        for archive in self.list_archives()? {
            if archive.created_at >= cutoff {
                continue;
            }
            match fs::remove_file(&archive.path) {
                Ok(()) => {
                    debug!("Removed old archive {}", archive.name);
                    removed += 1;
                }
                Err(e) => warn!("Failed to remove old archive {}: {}", archive.name, e),
            }
        }

        if removed > 0 {
            info!("Removed {} archives older than {} days", removed, days);
        }
        Ok(removed)
    }
}

fn is_archive_name(name: &str) -> bool {
    name.len() > ARCHIVE_EXTENSION.len()
        && name.ends_with(ARCHIVE_EXTENSION)
        && !name.starts_with('.')
}
