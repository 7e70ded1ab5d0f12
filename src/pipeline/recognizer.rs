//! Stage 2: recognize every region of a manifest and write the page document.

use std::path::Path;

use image::DynamicImage;

use super::manifest::{load_manifest, save_manifest};
use super::merge::document_from_manifest;
use super::recognition::pool::{ProgressFn, RecognitionPool, RegionJob};
use super::recognition::retry::{is_failure_text, RegionOutcome};
use super::region::Region;
use super::PipelineError;

pub struct Recognizer {
    pool: RecognitionPool,
    reuse_region_text: bool,
}

impl Recognizer {
    pub fn new(pool: RecognitionPool) -> Self {
        Self {
            pool,
            reuse_region_text: false,
        }
    }

    /// Keep texts already recognized in the manifest instead of resubmitting.
    pub fn with_reuse_region_text(mut self, reuse: bool) -> Self {
        self.reuse_region_text = reuse;
        self
    }

    /// Recognize the regions in `manifest_dir` and write the page document
    /// to `output_path`. Returns the document text.
    pub fn process(
        &self,
        manifest_dir: &Path,
        output_path: &Path,
        progress: Option<&mut ProgressFn<'_>>,
    ) -> Result<String, PipelineError> {
        let mut manifest = load_manifest(manifest_dir)?;
        let _span = tracing::info_span!("recognize", image = %manifest.image_name).entered();

        let order = manifest.reading_order();
        let mut jobs = Vec::with_capacity(order.len());
        let mut reused = 0usize;
        for index in order {
            let region = &manifest.regions[index];
            if self.reuse_region_text && has_real_text(region) {
                reused += 1;
                continue;
            }
            jobs.push(RegionJob {
                index,
                region_id: region.id.clone(),
                region_type: region.region_type.clone(),
                image: load_crop(manifest_dir, region),
            });
        }

        tracing::info!(
            regions = manifest.regions.len(),
            dispatched = jobs.len(),
            reused,
            "Recognizing regions"
        );

        let run = self.pool.run(jobs, manifest.regions.len(), progress);

        let mut tally = Tally::default();
        for (region, outcome) in manifest.regions.iter_mut().zip(run.outcomes) {
            if let Some(outcome) = outcome {
                tally.count(&outcome);
                region.text = Some(outcome.text().to_string());
            }
        }
        save_manifest(manifest_dir, &manifest)?;

        if run.cancelled {
            return Err(PipelineError::Cancelled);
        }

        tracing::info!(
            recognized = tally.recognized,
            blocked = tally.blocked,
            exhausted = tally.exhausted,
            failed = tally.failed,
            "Region recognition finished"
        );

        let document = document_from_manifest(&manifest)?;
        if let Some(parent) = output_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(output_path, &document)?;
        Ok(document)
    }
}

#[derive(Default)]
struct Tally {
    recognized: usize,
    blocked: usize,
    exhausted: usize,
    failed: usize,
}

impl Tally {
    fn count(&mut self, outcome: &RegionOutcome) {
        match outcome {
            RegionOutcome::Recognized(_) => self.recognized += 1,
            RegionOutcome::Blocked => self.blocked += 1,
            RegionOutcome::Exhausted => self.exhausted += 1,
            RegionOutcome::Failed => self.failed += 1,
        }
    }
}

fn has_real_text(region: &Region) -> bool {
    region
        .text
        .as_deref()
        .is_some_and(|t| !t.trim().is_empty() && !is_failure_text(t))
}

/// Load a region crop; a missing or unreadable crop becomes a 1×1 placeholder.
fn load_crop(manifest_dir: &Path, region: &Region) -> DynamicImage {
    if region.image_file.is_empty() {
        tracing::warn!(region_id = %region.id, "Region has no crop file, using placeholder");
        return DynamicImage::new_rgb8(1, 1);
    }
    let path = manifest_dir.join(&region.image_file);
    match image::open(&path) {
        Ok(img) => img,
        Err(e) => {
            tracing::warn!(
                region_id = %region.id,
                path = %path.display(),
                error = %e,
                "Cannot load region crop, using placeholder"
            );
            DynamicImage::new_rgb8(1, 1)
        }
    }
}
