//! Archive container: a gzip-compressed tar with reserved entries.
//!
//! Writers stage into `<path>.partial` and only rename into place on
//! [`ArchiveWriter::finalize`], so an interrupted export never leaves a
//! half-written archive under its final name. Readers index the container
//! once on open and refuse anything without a readable manifest.

use crate::error::{Error, IoContext, Result};
use crate::manifest::Manifest;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Component, Path, PathBuf};
use tar::{Archive, Builder as TarBuilder, EntryType, Header};
use tracing::{debug, warn};

/// Name of the manifest entry.
pub const MANIFEST_ENTRY: &str = "siteport-manifest.json";

/// Name of the dump-script entry.
pub const DUMP_ENTRY: &str = "database.sql";

/// File extension of finished archives.
pub const ARCHIVE_EXTENSION: &str = ".tar.gz";

/// Suffix of archives still being written.
pub const PARTIAL_SUFFIX: &str = ".partial";

/// Default compression level (6 = balanced speed/ratio).
pub const DEFAULT_COMPRESSION_LEVEL: u32 = 6;

/// Result of finalizing an archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveSummary {
    /// Path to the finished archive
    pub path: PathBuf,

    /// Size of the archive in bytes
    pub size_bytes: u64,

    /// Number of entries written
    pub entries: usize,
}

/// Checks an entry name and returns its canonical form.
///
/// Names are `/`-separated relative paths; empty, `.` and `..` components
/// are rejected along with absolute paths and backslashes.
pub fn normalize_entry_name(name: &str) -> Result<String> {
    let trimmed = name.trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(Error::validation("archive entry name must not be empty"));
    }
    if trimmed.starts_with('/') || trimmed.contains('\\') {
        return Err(Error::validation(format!(
            "archive entry name '{}' must be a relative '/'-separated path",
            name
        )));
    }
    if trimmed
        .split('/')
        .any(|part| part.is_empty() || part == "." || part == "..")
    {
        return Err(Error::validation(format!(
            "archive entry name '{}' contains an empty, '.' or '..' component",
            name
        )));
    }
    Ok(trimmed.to_string())
}

/// Streaming archive writer.
pub struct ArchiveWriter {
    path: PathBuf,
    partial_path: PathBuf,
    builder: Option<TarBuilder<GzEncoder<BufWriter<File>>>>,
    names: HashSet<String>,
    finalized: bool,
}

impl ArchiveWriter {
    /// Starts a new archive that will land at `path` once finalized.
    pub fn create(path: &Path, compression_level: u32) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| Error::io_at("create", parent, e))?;
        }

        let mut partial = path.as_os_str().to_owned();
        partial.push(PARTIAL_SUFFIX);
        let partial_path = PathBuf::from(partial);

        let file = File::create(&partial_path).map_err(|e| Error::io_at("create", &partial_path, e))?;
        let encoder = GzEncoder::new(
            BufWriter::new(file),
            Compression::new(compression_level.clamp(1, 9)),
        );
        let mut builder = TarBuilder::new(encoder);
        builder.follow_symlinks(false);

        debug!("Writing archive to {}", partial_path.display());

        Ok(Self {
            path: path.to_path_buf(),
            partial_path,
            builder: Some(builder),
            names: HashSet::new(),
            finalized: false,
        })
    }

    /// Final location of the archive
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of entries added so far
    pub fn entry_count(&self) -> usize {
        self.names.len()
    }

    pub fn has_entry(&self, name: &str) -> bool {
        normalize_entry_name(name)
            .map(|n| self.names.contains(&n))
            .unwrap_or(false)
    }

    fn claim(&mut self, name: &str) -> Result<String> {
        let name = normalize_entry_name(name)?;
        if !self.names.insert(name.clone()) {
            return Err(Error::validation(format!(
                "archive entry '{}' was already written",
                name
            )));
        }
        Ok(name)
    }

    fn builder(&mut self) -> Result<&mut TarBuilder<GzEncoder<BufWriter<File>>>> {
        self.builder
            .as_mut()
            .ok_or_else(|| Error::fatal("archive writer already finalized"))
    }

    /// Adds an in-memory entry.
    pub fn add_entry(&mut self, name: &str, bytes: &[u8]) -> Result<()> {
        self.add_entry_from_reader(name, bytes, bytes.len() as u64)
    }

    /// Adds an entry streamed from `reader`, which must yield exactly `size` bytes.
    pub fn add_entry_from_reader<R: Read>(&mut self, name: &str, reader: R, size: u64) -> Result<()> {
        let name = self.claim(name)?;
        let mut header = Header::new_gnu();
        header.set_entry_type(EntryType::Regular);
        header.set_size(size);
        header.set_mode(0o644);
        header.set_mtime(now_secs());

        let path = self.partial_path.clone();
        self.builder()?
            .append_data(&mut header, &name, reader)
            .map_err(|e| Error::io(format!("Failed to write entry {} to {}", name, path.display()), e))
    }

    /// Adds a file from disk, streaming its content.
    pub fn add_file(&mut self, name: &str, source: &Path) -> Result<u64> {
        let file = File::open(source).map_err(|e| Error::io_at("open", source, e))?;
        let size = file
            .metadata()
            .map_err(|e| Error::io_at("stat", source, e))?
            .len();
        self.add_entry_from_reader(name, BufReader::new(file), size)?;
        Ok(size)
    }

    /// Adds a directory entry so empty directories survive a round trip.
    pub fn add_dir(&mut self, name: &str) -> Result<()> {
        let name = self.claim(name)?;
        let mut header = Header::new_gnu();
        header.set_entry_type(EntryType::Directory);
        header.set_size(0);
        header.set_mode(0o755);
        header.set_mtime(now_secs());

        let path = self.partial_path.clone();
        self.builder()?
            .append_data(&mut header, format!("{}/", name), io::empty())
            .map_err(|e| Error::io(format!("Failed to write entry {} to {}", name, path.display()), e))
    }

    /// Flushes the container and moves it to its final location.
    ///
    /// Fails with `ArchiveFormat` when no manifest entry was written.
    pub fn finalize(mut self) -> Result<ArchiveSummary> {
        if !self.names.contains(MANIFEST_ENTRY) {
            return Err(Error::archive_format(format!(
                "refusing to finalize {} without {}",
                self.path.display(),
                MANIFEST_ENTRY
            )));
        }

        let builder = self
            .builder
            .take()
            .ok_or_else(|| Error::fatal("archive writer already finalized"))?;
        let partial = self.partial_path.clone();
        let encoder = builder
            .into_inner()
            .io_context(|| format!("Failed to finish tar stream {}", partial.display()))?;
        let writer = encoder
            .finish()
            .io_context(|| format!("Failed to finish gzip stream {}", partial.display()))?;
        let file = writer
            .into_inner()
            .map_err(|e| Error::io_at("flush", &partial, e.into_error()))?;
        file.sync_all().map_err(|e| Error::io_at("sync", &partial, e))?;
        drop(file);

        fs::rename(&self.partial_path, &self.path)
            .map_err(|e| Error::io_at("move into place", &self.path, e))?;
        self.finalized = true;

        let size_bytes = fs::metadata(&self.path)
            .map_err(|e| Error::io_at("stat", &self.path, e))?
            .len();

        debug!(
            "Finalized archive {} ({} entries, {} bytes)",
            self.path.display(),
            self.names.len(),
            size_bytes
        );

        Ok(ArchiveSummary {
            path: self.path.clone(),
            size_bytes,
            entries: self.names.len(),
        })
    }
}

impl Drop for ArchiveWriter {
    fn drop(&mut self) {
        if self.finalized {
            return;
        }
        // Drop the builder first so it stops writing to the partial file
        self.builder.take();
        if let Err(e) = fs::remove_file(&self.partial_path) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(
                    "Failed to remove partial archive {}: {}",
                    self.partial_path.display(),
                    e
                );
            }
        }
    }
}

fn now_secs() -> u64 {
    chrono::Utc::now().timestamp().max(0) as u64
}

/// One entry of an opened archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntryInfo {
    pub name: String,
    pub size: u64,
    pub is_dir: bool,
}

/// Indexed, read-only view of an archive.
#[derive(Debug)]
pub struct ArchiveReader {
    path: PathBuf,
    entries: Vec<ArchiveEntryInfo>,
    manifest: Manifest,
}

type TarStream = Archive<GzDecoder<BufReader<File>>>;

impl ArchiveReader {
    /// Opens and indexes an archive, parsing its manifest.
    pub fn open(path: &Path) -> Result<Self> {
        let mut archive = open_stream(path)?;
        let mut entries = Vec::new();
        let mut manifest = None;

        let iter = archive.entries().map_err(|e| corrupt(path, e))?;
        for entry in iter {
            let mut entry = entry.map_err(|e| corrupt(path, e))?;
            let Some(name) = entry_name(&entry)? else {
                continue;
            };
            let is_dir = entry.header().entry_type().is_dir();
            let size = entry.header().size().map_err(|e| corrupt(path, e))?;

            if name == MANIFEST_ENTRY {
                let mut json = String::new();
                entry
                    .read_to_string(&mut json)
                    .map_err(|e| corrupt(path, e))?;
                manifest = Some(Manifest::from_json(&json)?);
            }

            entries.push(ArchiveEntryInfo { name, size, is_dir });
        }

        let manifest = manifest.ok_or_else(|| {
            Error::archive_format(format!(
                "{} has no {} entry",
                path.display(),
                MANIFEST_ENTRY
            ))
        })?;

        debug!("Indexed {} entries in {}", entries.len(), path.display());

        Ok(Self {
            path: path.to_path_buf(),
            entries,
            manifest,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    pub fn entries(&self) -> &[ArchiveEntryInfo] {
        &self.entries
    }

    pub fn entry_names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.name.as_str())
    }

    pub fn has_entry(&self, name: &str) -> bool {
        self.entries.iter().any(|e| e.name == name)
    }

    /// Reads a whole entry into memory.
    pub fn entry(&self, name: &str) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.copy_entry(name, &mut buf)?;
        Ok(buf)
    }

    /// Streams one entry into `writer`, returning the bytes copied.
    pub fn copy_entry(&self, name: &str, writer: &mut dyn Write) -> Result<u64> {
        let mut archive = open_stream(&self.path)?;
        let iter = archive.entries().map_err(|e| corrupt(&self.path, e))?;
        for entry in iter {
            let mut entry = entry.map_err(|e| corrupt(&self.path, e))?;
            if entry_name(&entry)?.as_deref() == Some(name) {
                return io::copy(&mut entry, writer).map_err(|e| corrupt(&self.path, e));
            }
        }
        Err(Error::archive_format(format!(
            "{} has no {} entry",
            self.path.display(),
            name
        )))
    }

    /// Extracts every file and directory entry below `dest`.
    ///
    /// Links and other special entries are skipped; an entry that would
    /// land outside `dest` fails the whole extraction.
    pub fn extract_all(&self, dest: &Path) -> Result<usize> {
        fs::create_dir_all(dest).map_err(|e| Error::io_at("create", dest, e))?;

        let mut archive = open_stream(&self.path)?;
        archive.set_preserve_permissions(false);
        archive.set_overwrite(true);

        let mut extracted = 0;
        let iter = archive.entries().map_err(|e| corrupt(&self.path, e))?;
        for entry in iter {
            let mut entry = entry.map_err(|e| corrupt(&self.path, e))?;
            let kind = entry.header().entry_type();
            if !(kind.is_file() || kind.is_dir()) {
                continue;
            }
            let Some(name) = entry_name(&entry)? else {
                continue;
            };
            let unpacked = entry
                .unpack_in(dest)
                .map_err(|e| Error::io(format!("Failed to extract {}", name), e))?;
            if !unpacked {
                return Err(Error::archive_format(format!(
                    "entry '{}' escapes the extraction directory",
                    name
                )));
            }
            extracted += 1;
        }

        debug!("Extracted {} entries to {}", extracted, dest.display());
        Ok(extracted)
    }

    /// Streams every entry under `prefix/`, passing the path relative to
    /// the prefix, whether it is a directory, and a reader over its bytes.
    pub fn for_each_under(
        &self,
        prefix: &str,
        f: &mut dyn FnMut(&str, bool, &mut dyn Read) -> Result<()>,
    ) -> Result<()> {
        let prefix = normalize_entry_name(prefix)?;
        let mut archive = open_stream(&self.path)?;
        let iter = archive.entries().map_err(|e| corrupt(&self.path, e))?;
        for entry in iter {
            let mut entry = entry.map_err(|e| corrupt(&self.path, e))?;
            let kind = entry.header().entry_type();
            if !(kind.is_file() || kind.is_dir()) {
                continue;
            }
            let Some(name) = entry_name(&entry)? else {
                continue;
            };
            let Some(rel) = name
                .strip_prefix(prefix.as_str())
                .and_then(|rest| rest.strip_prefix('/'))
            else {
                continue;
            };
            let rel = rel.to_string();
            f(&rel, kind.is_dir(), &mut entry)?;
        }
        Ok(())
    }
}

fn open_stream(path: &Path) -> Result<TarStream> {
    let file = File::open(path).map_err(|e| {
        if e.kind() == io::ErrorKind::NotFound {
            Error::archive_format(format!("archive {} does not exist", path.display()))
        } else {
            Error::io_at("open", path, e)
        }
    })?;
    Ok(Archive::new(GzDecoder::new(BufReader::new(file))))
}

fn corrupt(path: &Path, e: io::Error) -> Error {
    Error::archive_format(format!("{} cannot be read: {}", path.display(), e))
}

/// Canonical name of a tar entry; `None` for the archive root itself.
fn entry_name<R: Read>(entry: &tar::Entry<'_, R>) -> Result<Option<String>> {
    let path = entry
        .path()
        .map_err(|e| Error::archive_format(format!("unreadable entry path: {}", e)))?;

    let mut parts = Vec::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => {
                let part = part.to_str().ok_or_else(|| {
                    Error::archive_format(format!("entry path {} is not UTF-8", path.display()))
                })?;
                parts.push(part.to_string());
            }
            Component::CurDir => {}
            _ => {
                return Err(Error::archive_format(format!(
                    "entry path {} is not a plain relative path",
                    path.display()
                )))
            }
        }
    }

    if parts.is_empty() {
        Ok(None)
    } else {
        Ok(Some(parts.join("/")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::ExportOptions;
    use tempfile::TempDir;

    fn manifest_json() -> String {
        Manifest::new("test", "3.45.0", "http://old.example", ExportOptions::default())
            .to_json()
            .unwrap()
    }

    fn write_sample(path: &Path) -> ArchiveSummary {
        let mut writer = ArchiveWriter::create(path, DEFAULT_COMPRESSION_LEVEL).unwrap();
        writer.add_entry(DUMP_ENTRY, b"CREATE TABLE t (a);\n").unwrap();
        writer.add_dir("uploads").unwrap();
        writer.add_dir("uploads/2024").unwrap();
        writer.add_entry("uploads/2024/a.txt", b"alpha").unwrap();
        writer.add_entry(MANIFEST_ENTRY, manifest_json().as_bytes()).unwrap();
        writer.finalize().unwrap()
    }

    #[test]
    fn test_normalize_entry_name() {
        assert_eq!(normalize_entry_name("uploads/a.txt").unwrap(), "uploads/a.txt");
        assert_eq!(normalize_entry_name("uploads/").unwrap(), "uploads");
        assert!(normalize_entry_name("").is_err());
        assert!(normalize_entry_name("/etc/passwd").is_err());
        assert!(normalize_entry_name("uploads/../../x").is_err());
        assert!(normalize_entry_name("uploads//x").is_err());
        assert!(normalize_entry_name("uploads\\x").is_err());
    }

    #[test]
    fn test_write_and_read_back() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("site.tar.gz");

        let summary = write_sample(&path);
        assert_eq!(summary.entries, 5);
        assert!(summary.size_bytes > 0);
        assert!(path.exists());
        assert!(!temp_dir.path().join("site.tar.gz.partial").exists());

        let reader = ArchiveReader::open(&path).unwrap();
        assert!(reader.has_entry(MANIFEST_ENTRY));
        assert!(reader.has_entry(DUMP_ENTRY));
        assert!(reader.has_entry("uploads/2024"));
        assert_eq!(reader.entry("uploads/2024/a.txt").unwrap(), b"alpha");
        assert_eq!(reader.manifest().origin_base_url, "http://old.example");

        let dirs: Vec<_> = reader.entries().iter().filter(|e| e.is_dir).collect();
        assert_eq!(dirs.len(), 2);
    }

    #[test]
    fn test_duplicate_entry_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let mut writer =
            ArchiveWriter::create(&temp_dir.path().join("dup.tar.gz"), DEFAULT_COMPRESSION_LEVEL)
                .unwrap();
        writer.add_entry(DUMP_ENTRY, b"one").unwrap();
        let err = writer.add_entry(DUMP_ENTRY, b"two").unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_finalize_without_manifest_fails() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("bare.tar.gz");
        let mut writer = ArchiveWriter::create(&path, DEFAULT_COMPRESSION_LEVEL).unwrap();
        writer.add_entry(DUMP_ENTRY, b"x").unwrap();
        let err = writer.finalize().unwrap_err();
        assert!(matches!(err, Error::ArchiveFormat(_)));
        assert!(!path.exists());
        assert!(!temp_dir.path().join("bare.tar.gz.partial").exists());
    }

    #[test]
    fn test_dropped_writer_leaves_nothing() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("abandoned.tar.gz");
        {
            let mut writer = ArchiveWriter::create(&path, DEFAULT_COMPRESSION_LEVEL).unwrap();
            writer.add_entry("uploads/a.txt", b"data").unwrap();
            assert!(temp_dir.path().join("abandoned.tar.gz.partial").exists());
        }
        assert_eq!(fs::read_dir(temp_dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_open_missing_manifest() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nomanifest.tar.gz");

        let file = File::create(&path).unwrap();
        let mut builder = TarBuilder::new(flate2::write::GzEncoder::new(file, Compression::default()));
        let mut header = Header::new_gnu();
        header.set_size(3);
        header.set_mode(0o644);
        builder.append_data(&mut header, DUMP_ENTRY, &b"abc"[..]).unwrap();
        builder.into_inner().unwrap().finish().unwrap();

        let err = ArchiveReader::open(&path).unwrap_err();
        assert!(matches!(err, Error::ArchiveFormat(_)), "got {:?}", err);
    }

    #[test]
    fn test_open_not_an_archive() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("junk.tar.gz");
        fs::write(&path, b"this is definitely not gzip data").unwrap();

        let err = ArchiveReader::open(&path).unwrap_err();
        assert!(matches!(err, Error::ArchiveFormat(_)), "got {:?}", err);
    }

    #[test]
    fn test_open_missing_file() {
        let err = ArchiveReader::open(Path::new("/nonexistent/siteport.tar.gz")).unwrap_err();
        assert!(matches!(err, Error::ArchiveFormat(_)));
    }

    #[test]
    fn test_missing_entry_is_format_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("site.tar.gz");
        write_sample(&path);

        let reader = ArchiveReader::open(&path).unwrap();
        let err = reader.entry("themes/style.css").unwrap_err();
        assert!(matches!(err, Error::ArchiveFormat(_)));
    }

    #[test]
    fn test_extract_all() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("site.tar.gz");
        write_sample(&path);

        let dest = temp_dir.path().join("scratch");
        let reader = ArchiveReader::open(&path).unwrap();
        let count = reader.extract_all(&dest).unwrap();

        assert_eq!(count, 5);
        assert_eq!(fs::read(dest.join("uploads/2024/a.txt")).unwrap(), b"alpha");
        assert!(dest.join(MANIFEST_ENTRY).is_file());
    }

    #[test]
    fn test_for_each_under_prefix() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("site.tar.gz");
        write_sample(&path);

        let reader = ArchiveReader::open(&path).unwrap();
        let mut seen = Vec::new();
        reader
            .for_each_under("uploads", &mut |rel, is_dir, data| {
                let mut content = String::new();
                data.read_to_string(&mut content).unwrap();
                seen.push((rel.to_string(), is_dir, content));
                Ok(())
            })
            .unwrap();

        assert_eq!(
            seen,
            vec![
                ("2024".to_string(), true, String::new()),
                ("2024/a.txt".to_string(), false, "alpha".to_string()),
            ]
        );
    }
}
