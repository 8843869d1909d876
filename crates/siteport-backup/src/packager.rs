//! Copies content directories into and out of archives.
//!
//! Packing scans first so checkpoints can report a real percentage, then
//! streams each file into the archive. Unpacking is an additive merge:
//! files present in the archive overwrite their destination counterparts,
//! and nothing already at the destination is ever deleted.

use crate::archive::{normalize_entry_name, ArchiveReader, ArchiveWriter};
use crate::error::{Error, Result};
use crate::filters::FileTreeFilter;
use crate::progress::{percent_of, Checkpoint};
use std::fs::{self, File};
use std::io;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Counts of what a pack or unpack touched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PackStats {
    pub files: u64,
    pub directories: u64,
    pub bytes: u64,
}

impl PackStats {
    pub fn merge(&mut self, other: PackStats) {
        self.files += other.files;
        self.directories += other.directories;
        self.bytes += other.bytes;
    }
}

struct ScannedItem {
    rel: String,
    path: PathBuf,
    is_dir: bool,
}

/// Packs `source_dir` into `writer` under `prefix`.
///
/// A missing source directory packs nothing. Symlinks are skipped.
pub fn pack(
    writer: &mut ArchiveWriter,
    source_dir: &Path,
    prefix: &str,
    filter: &FileTreeFilter,
    checkpoint: &mut dyn Checkpoint,
) -> Result<PackStats> {
    let mut stats = PackStats::default();
    if !source_dir.exists() {
        debug!("Skipping non-existent path: {}", source_dir.display());
        checkpoint.reached(100, &format!("No {} to pack", prefix))?;
        return Ok(stats);
    }
    if !source_dir.is_dir() {
        return Err(Error::validation(format!(
            "{} is not a directory",
            source_dir.display()
        )));
    }

    let items = scan(source_dir, filter)?;
    let total_files = items.iter().filter(|i| !i.is_dir).count() as u64;
    debug!(
        "Found {} files to pack under {}",
        total_files,
        source_dir.display()
    );

    writer.add_dir(prefix)?;
    stats.directories += 1;

    for item in &items {
        let name = format!("{}/{}", prefix, item.rel);
        if item.is_dir {
            writer.add_dir(&name)?;
            stats.directories += 1;
            continue;
        }

        checkpoint.reached(percent_of(stats.files, total_files), &format!("Packing {}", name))?;
        stats.bytes += writer.add_file(&name, &item.path)?;
        stats.files += 1;
    }

    checkpoint.reached(100, &format!("Packed {} files into {}", stats.files, prefix))?;
    Ok(stats)
}

fn scan(source_dir: &Path, filter: &FileTreeFilter) -> Result<Vec<ScannedItem>> {
    let mut items = Vec::new();
    let walker = WalkDir::new(source_dir)
        .follow_links(false)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| match relative_name(source_dir, e.path()) {
            Some(rel) => !filter.is_excluded(&rel),
            None => true,
        });

    for entry in walker {
        let entry = entry.map_err(|e| {
            let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| source_dir.to_path_buf());
            Error::io_at(
                "walk",
                &path,
                e.into_io_error()
                    .unwrap_or_else(|| io::Error::new(io::ErrorKind::Other, "filesystem loop")),
            )
        })?;

        let file_type = entry.file_type();
        if file_type.is_symlink() {
            debug!("Skipping symlink {}", entry.path().display());
            continue;
        }
        if !(file_type.is_file() || file_type.is_dir()) {
            continue;
        }

        let Some(rel) = relative_name(source_dir, entry.path()) else {
            warn!("Skipping non UTF-8 path {}", entry.path().display());
            continue;
        };

        items.push(ScannedItem {
            rel,
            path: entry.path().to_path_buf(),
            is_dir: file_type.is_dir(),
        });
    }

    Ok(items)
}

/// `/`-separated path of `path` below `root`, if it is valid UTF-8.
fn relative_name(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let parts: Option<Vec<&str>> = rel
        .components()
        .map(|c| match c {
            Component::Normal(part) => part.to_str(),
            _ => None,
        })
        .collect();
    let parts = parts?;
    (!parts.is_empty()).then(|| parts.join("/"))
}

/// Streams the archive subtree under `prefix` into `dest_dir`.
pub fn unpack(
    reader: &ArchiveReader,
    prefix: &str,
    dest_dir: &Path,
    checkpoint: &mut dyn Checkpoint,
) -> Result<PackStats> {
    let total_files = reader
        .entries()
        .iter()
        .filter(|e| !e.is_dir && e.name.starts_with(&format!("{}/", prefix)))
        .count() as u64;

    fs::create_dir_all(dest_dir).map_err(|e| Error::io_at("create", dest_dir, e))?;

    let mut stats = PackStats::default();
    reader.for_each_under(prefix, &mut |rel, is_dir, data| {
        let target = safe_join(dest_dir, rel)?;
        if is_dir {
            fs::create_dir_all(&target).map_err(|e| Error::io_at("create", &target, e))?;
            stats.directories += 1;
            return Ok(());
        }

        checkpoint.reached(
            percent_of(stats.files, total_files),
            &format!("Restoring {}/{}", prefix, rel),
        )?;
        prepare_target(&target)?;
        let mut file = File::create(&target).map_err(|e| Error::io_at("create", &target, e))?;
        stats.bytes += io::copy(data, &mut file).map_err(|e| Error::io_at("write", &target, e))?;
        stats.files += 1;
        Ok(())
    })?;

    checkpoint.reached(100, &format!("Restored {} files from {}", stats.files, prefix))?;
    Ok(stats)
}

/// Copies an already extracted subtree over `dest_dir`.
pub fn unpack_dir(
    source_dir: &Path,
    dest_dir: &Path,
    checkpoint: &mut dyn Checkpoint,
) -> Result<PackStats> {
    let mut stats = PackStats::default();
    if !source_dir.is_dir() {
        return Ok(stats);
    }

    let no_filter = FileTreeFilter::new(Vec::<String>::new())?;
    let items = scan(source_dir, &no_filter)?;
    let total_files = items.iter().filter(|i| !i.is_dir).count() as u64;

    fs::create_dir_all(dest_dir).map_err(|e| Error::io_at("create", dest_dir, e))?;

    for item in &items {
        let target = safe_join(dest_dir, &item.rel)?;
        if item.is_dir {
            fs::create_dir_all(&target).map_err(|e| Error::io_at("create", &target, e))?;
            stats.directories += 1;
            continue;
        }

        checkpoint.reached(
            percent_of(stats.files, total_files),
            &format!("Copying {}", item.rel),
        )?;
        prepare_target(&target)?;
        stats.bytes += fs::copy(&item.path, &target).map_err(|e| Error::io_at("copy to", &target, e))?;
        stats.files += 1;
    }

    checkpoint.reached(100, &format!("Copied {} files", stats.files))?;
    Ok(stats)
}

fn safe_join(dest_dir: &Path, rel: &str) -> Result<PathBuf> {
    let rel = normalize_entry_name(rel)
        .map_err(|_| Error::archive_format(format!("entry path '{}' escapes destination", rel)))?;
    Ok(dest_dir.join(rel))
}

/// Creates parent directories and clears a symlink sitting at `target`
/// so the write cannot follow it elsewhere.
fn prepare_target(target: &Path) -> Result<()> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).map_err(|e| Error::io_at("create", parent, e))?;
    }
    if let Ok(meta) = fs::symlink_metadata(target) {
        if meta.file_type().is_symlink() {
            fs::remove_file(target).map_err(|e| Error::io_at("remove", target, e))?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::{ArchiveReader, ArchiveWriter, MANIFEST_ENTRY};
    use crate::manifest::Manifest;
    use crate::options::ExportOptions;
    use crate::progress::NoCheckpoint;
    use tempfile::TempDir;

    fn write_tree(root: &Path, files: &[(&str, &str)]) {
        for (rel, content) in files {
            let path = root.join(rel);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, content).unwrap();
        }
    }

    fn pack_to_archive(source: &Path, filter: &FileTreeFilter, archive: &Path) -> PackStats {
        let mut writer = ArchiveWriter::create(archive, 6).unwrap();
        let stats = pack(&mut writer, source, "plugins", filter, &mut NoCheckpoint).unwrap();
        let manifest = Manifest::new("t", "3", "http://a.example", ExportOptions::default());
        writer
            .add_entry(MANIFEST_ENTRY, manifest.to_json().unwrap().as_bytes())
            .unwrap();
        writer.finalize().unwrap();
        stats
    }

    #[test]
    fn test_pack_unpack_round_trip_with_exclusions() {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("plugins");
        write_tree(
            &source,
            &[
                ("akismet/akismet.php", "<?php // akismet"),
                ("jetpack/jetpack.php", "<?php // jetpack"),
                ("jetpack/modules/stats.php", "stats"),
                ("hello.php", "hello"),
                (".git/HEAD", "ref"),
            ],
        );
        fs::create_dir_all(source.join("empty")).unwrap();

        let filter = FileTreeFilter::new(["akismet"]).unwrap();
        let archive = temp_dir.path().join("p.tar.gz");
        let stats = pack_to_archive(&source, &filter, &archive);
        assert_eq!(stats.files, 3);

        let reader = ArchiveReader::open(&archive).unwrap();
        assert!(!reader.entry_names().any(|n| n.starts_with("plugins/akismet")));
        assert!(!reader.entry_names().any(|n| n.contains(".git")));

        let dest = temp_dir.path().join("restored");
        let restored = unpack(&reader, "plugins", &dest, &mut NoCheckpoint).unwrap();
        assert_eq!(restored.files, 3);
        assert_eq!(fs::read_to_string(dest.join("hello.php")).unwrap(), "hello");
        assert_eq!(
            fs::read_to_string(dest.join("jetpack/modules/stats.php")).unwrap(),
            "stats"
        );
        assert!(dest.join("empty").is_dir());
        assert!(!dest.join("akismet").exists());
    }

    #[test]
    fn test_pack_missing_source_is_empty() {
        let temp_dir = TempDir::new().unwrap();
        let filter = FileTreeFilter::new(Vec::<String>::new()).unwrap();
        let mut writer = ArchiveWriter::create(&temp_dir.path().join("x.tar.gz"), 6).unwrap();
        let stats = pack(
            &mut writer,
            &temp_dir.path().join("missing"),
            "themes",
            &filter,
            &mut NoCheckpoint,
        )
        .unwrap();
        assert_eq!(stats, PackStats::default());
        assert_eq!(writer.entry_count(), 0);
    }

    #[test]
    fn test_unpack_is_additive() {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("plugins");
        write_tree(&source, &[("a.txt", "new a")]);

        let archive = temp_dir.path().join("p.tar.gz");
        pack_to_archive(&source, &FileTreeFilter::new(Vec::<String>::new()).unwrap(), &archive);

        let dest = temp_dir.path().join("dest");
        write_tree(&dest, &[("a.txt", "old a"), ("stale.txt", "keep me")]);

        let reader = ArchiveReader::open(&archive).unwrap();
        unpack(&reader, "plugins", &dest, &mut NoCheckpoint).unwrap();

        assert_eq!(fs::read_to_string(dest.join("a.txt")).unwrap(), "new a");
        assert_eq!(fs::read_to_string(dest.join("stale.txt")).unwrap(), "keep me");
    }

    #[test]
    fn test_unpack_dir_overwrites_and_keeps() {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("src");
        let dest = temp_dir.path().join("dest");
        write_tree(&source, &[("x/y.txt", "fresh"), ("z.txt", "zed")]);
        write_tree(&dest, &[("x/y.txt", "stale"), ("other.txt", "untouched")]);

        let stats = unpack_dir(&source, &dest, &mut NoCheckpoint).unwrap();
        assert_eq!(stats.files, 2);
        assert_eq!(fs::read_to_string(dest.join("x/y.txt")).unwrap(), "fresh");
        assert_eq!(fs::read_to_string(dest.join("z.txt")).unwrap(), "zed");
        assert_eq!(fs::read_to_string(dest.join("other.txt")).unwrap(), "untouched");
    }

    #[test]
    fn test_relative_name() {
        let root = Path::new("/srv/content/uploads");
        assert_eq!(
            relative_name(root, Path::new("/srv/content/uploads/2024/a.jpg")).as_deref(),
            Some("2024/a.jpg")
        );
        assert_eq!(relative_name(root, root), None);
    }

    #[test]
    fn test_safe_join_rejects_escape() {
        let dest = Path::new("/tmp/dest");
        assert!(safe_join(dest, "../etc/passwd").is_err());
        assert_eq!(safe_join(dest, "a/b").unwrap(), dest.join("a/b"));
    }
}
