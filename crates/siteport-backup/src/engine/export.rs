//! Export pipeline: dump, pack, seal.

use super::hooks::PipelineStep;
use super::job::ExportResult;
use super::JobRun;
use crate::archive::{ArchiveWriter, ARCHIVE_EXTENSION, DUMP_ENTRY, MANIFEST_ENTRY};
use crate::category::ContentCategory;
use crate::checksum::ChecksumWriter;
use crate::dump::dump;
use crate::error::{Error, Result};
use crate::filters::FileTreeFilter;
use crate::manifest::{ArchiveStatistics, DumpInfo, Manifest};
use crate::options::ExportOptions;
use crate::packager::{pack, PackStats};
use crate::progress::Scaled;
use chrono::{DateTime, Utc};
use siteport_core::utils::slugify;
use std::fs::File;
use std::io::BufWriter;
use tracing::{info, warn};
use uuid::Uuid;

/// Progress sub-ranges of each content category while packing
const PACK_RANGES: [(u8, u8); 3] = [(50, 65), (65, 80), (80, 92)];

pub(crate) fn run_export(run: &mut JobRun<'_>, options: &ExportOptions) -> Result<ExportResult> {
    build_archive(run, options, None, (0, 100))
}

/// `[label_]<site-slug>_<timestamp>_<suffix>.tar.gz`
pub(crate) fn archive_file_name(
    site_name: &str,
    label: Option<&str>,
    created_at: DateTime<Utc>,
) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    let mut name = String::new();
    if let Some(label) = label {
        name.push_str(&slugify(label));
        name.push('_');
    }
    name.push_str(&slugify(site_name));
    name.push('_');
    name.push_str(&created_at.format("%Y-%m-%d_%H-%M-%S").to_string());
    name.push('_');
    name.push_str(&suffix[..8]);
    name.push_str(ARCHIVE_EXTENSION);
    name
}

/// Writes a complete archive of the site into the archive directory.
///
/// Progress is reported inside `range`, so the same pipeline serves a
/// plain export (`0..100`) and the pre-import rollback archive. An error
/// or cancellation leaves no archive behind.
pub(crate) fn build_archive(
    run: &mut JobRun<'_>,
    options: &ExportOptions,
    label: Option<&str>,
    range: (u8, u8),
) -> Result<ExportResult> {
    let ctx = run.context();
    let config = ctx.config();
    let at = |percent: u8| -> u8 {
        let span = u16::from(range.1.saturating_sub(range.0));
        range.0 + (span * u16::from(percent.min(100)) / 100) as u8
    };

    let archive_dir = ctx.archive_dir();
    ctx.library().ensure_dir()?;

    let created_at = Utc::now();
    let archive_name = archive_file_name(&config.site().name, label, created_at);
    let archive_path = archive_dir.join(&archive_name);

    let scratch = tempfile::Builder::new()
        .prefix(".siteport-export-")
        .tempdir_in(&archive_dir)
        .map_err(|e| Error::io_at("create scratch directory in", &archive_dir, e))?;

    let store = ctx.connector().connect()?;
    let mut manifest = Manifest::new(
        config.site().name.clone(),
        store.platform_version(),
        config.base_url(),
        options.clone(),
    )
    .with_site_platform_version(config.site().platform_version.clone());
    manifest.created_at = created_at;

    let mut writer = ArchiveWriter::create(&archive_path, config.storage().compression_level)?;

    if options.include_database {
        info!("Stage 1/3: Dumping structured store");
        let dump_info = run.step(PipelineStep::Dump, |run| {
            let dump_path = scratch.path().join(DUMP_ENTRY);
            let file = File::create(&dump_path).map_err(|e| Error::io_at("create", &dump_path, e))?;
            let mut out = ChecksumWriter::new(BufWriter::new(file));

            let stats = {
                let mut checkpoint = Scaled::new(run, at(10), at(50));
                dump(&*store, &options.exclude_tables, &mut out, &mut checkpoint)?
            };

            let (buffered, sha256, size_bytes) = out
                .finish()
                .map_err(|e| Error::io_at("write", &dump_path, e))?;
            buffered
                .into_inner()
                .map_err(|e| Error::io_at("write", &dump_path, e.into_error()))?
                .sync_all()
                .map_err(|e| Error::io_at("sync", &dump_path, e))?;

            writer.add_file(DUMP_ENTRY, &dump_path)?;
            Ok(DumpInfo {
                entry: DUMP_ENTRY.to_string(),
                tables: stats.tables,
                rows: stats.rows,
                size_bytes,
                sha256,
            })
        })?;
        manifest = manifest.with_dump(dump_info);
    }
    drop(store);

    info!("Stage 2/3: Packing content");
    let content_dir = ctx.content_dir();
    let mut packed = PackStats::default();
    for (category, (start, end)) in ContentCategory::all().into_iter().zip(PACK_RANGES) {
        if !options.includes(category) {
            continue;
        }
        let filter = FileTreeFilter::for_category(category, options)?;
        let source = content_dir.join(category.prefix());
        let stats = run.step(PipelineStep::Pack(category), |run| {
            let mut checkpoint = Scaled::new(run, at(start), at(end));
            pack(
                &mut writer,
                &source,
                category.prefix(),
                &filter,
                &mut checkpoint,
            )
        })?;
        packed.merge(stats);
    }

    info!("Stage 3/3: Writing manifest");
    let manifest = manifest.with_statistics(ArchiveStatistics {
        files: packed.files,
        directories: packed.directories,
        content_bytes: packed.bytes,
    });
    let (tables, rows) = manifest
        .dump
        .as_ref()
        .map(|d| (d.tables, d.rows))
        .unwrap_or_default();

    let summary = run.step(PipelineStep::Finalize, |run| {
        run.checkpoint(at(95), "Writing manifest")?;
        writer.add_entry(MANIFEST_ENTRY, manifest.to_json()?.as_bytes())?;
        writer.finalize()
    })?;

    if let Err(e) = scratch.close() {
        warn!("Failed to remove export scratch directory: {}", e);
    }

    info!(
        "Archive {} written ({} entries, {} bytes)",
        archive_name, summary.entries, summary.size_bytes
    );
    Ok(ExportResult {
        archive_name,
        path: summary.path,
        size_bytes: summary.size_bytes,
        entries: summary.entries,
        tables,
        rows,
        files: packed.files,
        created_at,
    })
}
