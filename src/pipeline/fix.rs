//! Fix pass: re-run pages whose document is missing or suspiciously small.
//!
//! Failed pages are typically large scans that timed out on the
//! synchronous layout endpoint. The fix pass re-runs them through the job
//! API with a downscaled submission, then rebuilds the folder merge.

use std::path::{Path, PathBuf};

use serde::Serialize;

use super::merge::{merge_documents, MERGED_FILE};
use super::orchestrator::{list_images, Pipeline};
use super::splitter::image_stem;
use super::PipelineError;
use crate::config::{LayoutMode, Settings};

/// Layout timeout for the fix pass, covering submit, poll and fetch.
pub const FIX_LAYOUT_TIMEOUT_SECS: u64 = 900;
pub const DEFAULT_FIX_MAX_SIDE: u32 = 2500;
pub const DEFAULT_FIX_CONCURRENCY: usize = 2;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FixStats {
    /// Images in the input folder.
    pub total: usize,
    /// Images whose document already looked complete.
    pub already_done: usize,
    pub attempted: usize,
    pub fixed: usize,
    pub failed: usize,
}

/// Settings for the fix pass: job API, long timeout, downscaled
/// submissions and reduced concurrency.
pub fn apply_fix_overrides(settings: &mut Settings, max_side: u32, concurrency: usize) {
    settings.layout.mode = LayoutMode::Async;
    settings.layout.timeout = Some(FIX_LAYOUT_TIMEOUT_SECS);
    settings.layout.max_submission_side = Some(max_side);
    settings.processing.concurrency = concurrency.max(1);
}

fn document_path(output_dir: &Path, image: &Path) -> PathBuf {
    output_dir.join(format!("{}.md", image_stem(image)))
}

/// A page failed if its document is missing or at most `min_bytes` long.
fn looks_failed(document: &Path, min_bytes: u64) -> bool {
    match std::fs::metadata(document) {
        Ok(meta) => meta.len() <= min_bytes,
        Err(_) => true,
    }
}

/// Images in `input_dir` whose document in `output_dir` looks failed.
pub fn find_failed_images(
    input_dir: &Path,
    output_dir: &Path,
    min_bytes: u64,
) -> Result<Vec<PathBuf>, PipelineError> {
    Ok(list_images(input_dir)?
        .into_iter()
        .filter(|image| looks_failed(&document_path(output_dir, image), min_bytes))
        .collect())
}

/// Reprocess failed images and rebuild `merged_all.md`.
pub fn run_fix(
    pipeline: &Pipeline,
    input_dir: &Path,
    output_dir: &Path,
    min_bytes: u64,
) -> Result<FixStats, PipelineError> {
    std::fs::create_dir_all(output_dir)?;
    let total = list_images(input_dir)?.len();
    let failed_images = find_failed_images(input_dir, output_dir, min_bytes)?;

    let mut stats = FixStats {
        total,
        already_done: total - failed_images.len(),
        ..FixStats::default()
    };
    tracing::info!(
        total,
        to_fix = failed_images.len(),
        min_bytes,
        "Fix pass started"
    );

    for image in &failed_images {
        if pipeline.is_shutdown() {
            tracing::warn!("Shutdown requested, stopping fix pass");
            break;
        }
        let name = image_stem(image);
        stats.attempted += 1;
        match pipeline.process_image(image, output_dir) {
            Ok(doc) => {
                tracing::info!(item = %name, bytes = doc.len(), "Image fixed");
                stats.fixed += 1;
            }
            Err(PipelineError::Cancelled) => {
                tracing::error!(item = %name, "Fix cancelled");
                stats.failed += 1;
                break;
            }
            Err(e) => {
                tracing::error!(item = %name, error = %e, "Fix failed");
                stats.failed += 1;
            }
        }
    }

    let pages = rebuild_merged(input_dir, output_dir)?;
    tracing::info!(
        attempted = stats.attempted,
        fixed = stats.fixed,
        failed = stats.failed,
        merged_pages = pages,
        "Fix pass finished"
    );
    Ok(stats)
}

/// Rewrite `merged_all.md` from every existing document, in image name
/// order. Returns the number of pages merged.
pub fn rebuild_merged(input_dir: &Path, output_dir: &Path) -> Result<usize, PipelineError> {
    let documents: Vec<String> = list_images(input_dir)?
        .iter()
        .filter_map(|image| std::fs::read_to_string(document_path(output_dir, image)).ok())
        .collect();
    if !documents.is_empty() {
        std::fs::write(output_dir.join(MERGED_FILE), merge_documents(&documents))?;
    }
    Ok(documents.len())
}
