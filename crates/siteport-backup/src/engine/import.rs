//! Import pipeline: rollback, extract, verify, replay, restore.

use super::export::build_archive;
use super::hooks::PipelineStep;
use super::job::ImportSummary;
use super::JobRun;
use crate::archive::{normalize_entry_name, ArchiveReader};
use crate::category::ContentCategory;
use crate::checksum::calculate_checksum;
use crate::compatibility;
use crate::error::{Error, Result};
use crate::load::{Loader, ReplaySummary};
use crate::manifest::ENGINE_VERSION;
use crate::options::{ExportOptions, ImportOptions};
use crate::packager::{unpack_dir, PackStats};
use crate::progress::Scaled;
use crate::rewrite::UrlRewriter;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use tracing::{info, warn};

/// Progress sub-ranges of each content category while restoring
const RESTORE_RANGES: [(u8, u8); 3] = [(75, 82), (82, 89), (89, 95)];

pub(crate) fn run_import(
    run: &mut JobRun<'_>,
    archive_path: &Path,
    options: &ImportOptions,
) -> Result<ImportSummary> {
    let ctx = run.context();
    let config = ctx.config();
    let archive_name = archive_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let rollback_archive = if options.create_backup {
        info!("Stage 1/5: Creating rollback archive");
        let rollback = run.step(PipelineStep::Rollback, |run| {
            run.checkpoint(6, "Creating rollback archive...")?;
            build_archive(run, &ExportOptions::default(), Some("pre-import"), (6, 20))
        })?;
        info!("Rollback archive: {}", rollback.archive_name);
        Some(rollback.archive_name)
    } else {
        None
    };

    info!("Stage 2/5: Extracting {}", archive_name);
    let archive_dir = ctx.archive_dir();
    ctx.library().ensure_dir()?;
    let scratch = tempfile::Builder::new()
        .prefix(".siteport-import-")
        .tempdir_in(&archive_dir)
        .map_err(|e| Error::io_at("create scratch directory in", &archive_dir, e))?;

    let reader = run.step(PipelineStep::Extract, |run| {
        run.checkpoint(20, "Opening archive...")?;
        let reader = ArchiveReader::open(archive_path)?;
        reader.manifest().validate()?;
        let extracted = reader.extract_all(scratch.path())?;
        run.checkpoint(30, &format!("Extracted {} entries", extracted))?;
        Ok(reader)
    })?;
    let manifest = reader.manifest().clone();
    drop(reader);

    let mut store = ctx.connector().connect()?;

    info!("Stage 3/5: Verifying archive");
    let warnings = run.step(PipelineStep::Verify, |run| {
        run.checkpoint(32, "Verifying archive...")?;
        if let Some(dump) = &manifest.dump {
            let dump_path = scratch.path().join(normalize_entry_name(&dump.entry)?);
            if !dump_path.is_file() {
                return Err(Error::archive_format(format!(
                    "Archive is missing its dump entry {}",
                    dump.entry
                )));
            }
            let actual = calculate_checksum(&dump_path)?;
            if !actual.eq_ignore_ascii_case(&dump.sha256) {
                return Err(Error::archive_format(format!(
                    "Dump checksum mismatch: expected {}, got {}",
                    dump.sha256, actual
                )));
            }
        }

        let warnings = compatibility::check(
            &manifest,
            ENGINE_VERSION,
            &store.platform_version(),
            config.site().platform_version.as_deref(),
        );
        for warning in &warnings {
            warn!("Compatibility warning: {}", warning);
        }
        Ok(warnings)
    })?;

    let origin_url = options
        .old_url
        .clone()
        .unwrap_or_else(|| manifest.origin_base_url.clone());
    let dest_url = options
        .new_url
        .clone()
        .unwrap_or_else(|| config.base_url().to_string());

    let replay = match &manifest.dump {
        Some(dump) => {
            info!("Stage 4/5: Replaying dump ({} -> {})", origin_url, dest_url);
            let rewriter = UrlRewriter::new(&origin_url, &dest_url)?;
            let dump_path = scratch.path().join(normalize_entry_name(&dump.entry)?);
            run.step(PipelineStep::Replay, |run| {
                let file =
                    File::open(&dump_path).map_err(|e| Error::io_at("open", &dump_path, e))?;
                let total = file
                    .metadata()
                    .map_err(|e| Error::io_at("stat", &dump_path, e))?
                    .len();
                let mut checkpoint = Scaled::new(run, 35, 75);
                Loader::new().with_rewriter(rewriter).replay_reader(
                    &mut *store,
                    BufReader::new(file),
                    total,
                    &mut checkpoint,
                )
            })?
        }
        None => {
            info!("Stage 4/5: Archive carries no dump, skipping replay");
            ReplaySummary::default()
        }
    };
    drop(store);

    if replay.failed > 0 {
        warn!(
            "{} of {} statements failed during replay",
            replay.failed,
            replay.executed + replay.failed
        );
    }

    info!("Stage 5/5: Restoring content");
    let content_dir = ctx.content_dir();
    let mut restored = PackStats::default();
    for (category, (start, end)) in ContentCategory::all().into_iter().zip(RESTORE_RANGES) {
        let source = scratch.path().join(category.prefix());
        if !source.is_dir() {
            continue;
        }
        let target = content_dir.join(category.prefix());
        let stats = run.step(PipelineStep::Restore(category), |run| {
            let mut checkpoint = Scaled::new(run, start, end);
            unpack_dir(&source, &target, &mut checkpoint)
        })?;
        restored.merge(stats);
    }

    run.step(PipelineStep::Cleanup, |run| {
        run.checkpoint(97, "Cleaning up temporary files...")?;
        if let Err(e) = scratch.close() {
            warn!("Failed to remove import scratch directory: {}", e);
        }
        Ok(())
    })?;

    info!(
        "Import of {} into job {} finished: {} statements, {} files",
        archive_name,
        run.id(),
        replay.executed,
        restored.files
    );
    Ok(ImportSummary {
        archive_name,
        origin_url,
        dest_url,
        statements_executed: replay.executed,
        statements_failed: replay.failed,
        replay_errors: replay.errors,
        warnings,
        files_restored: restored.files,
        rollback_archive,
    })
}
