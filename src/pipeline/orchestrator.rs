//! Folder-level driver for Stage 1 and/or Stage 2, with resume.
//!
//! Per-image failures are logged and counted; they never stop the batch.
//! After the loop every page document produced or found on disk is
//! merged into `merged_all.md`.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;

use super::layout::paddle_jobs::resolve_job_url;
use super::layout::{GridLayout, LayoutClient, PaddleJobClient, PaddleVlClient};
use super::manifest::has_manifest;
use super::merge::{merge_documents, MERGED_FILE};
use super::recognition::qwen_vl::{DEFAULT_BASE_URL, DEFAULT_MODEL, DEFAULT_TIMEOUT_SECS};
use super::recognition::{QwenVlClient, RateLimiter, RecognitionPool, RetryPolicy};
use super::recognizer::Recognizer;
use super::splitter::{image_stem, Splitter};
use super::PipelineError;
use crate::config::{ConfigError, LayoutMode, Settings, QWEN_VL_ENGINE};

/// Source image extensions picked up by stage 1 (case-insensitive).
const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Layout segmentation only.
    Layout,
    /// Recognition of existing manifests only.
    Recognize,
    Both,
}

impl Stage {
    pub fn needs_layout(self) -> bool {
        matches!(self, Stage::Layout | Stage::Both)
    }

    pub fn needs_recognition(self) -> bool {
        matches!(self, Stage::Recognize | Stage::Both)
    }
}

impl FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "1" => Ok(Stage::Layout),
            "2" => Ok(Stage::Recognize),
            "both" => Ok(Stage::Both),
            other => Err(format!("unknown stage '{other}' (expected 1, 2 or both)")),
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Layout => write!(f, "1"),
            Stage::Recognize => write!(f, "2"),
            Stage::Both => write!(f, "both"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchStats {
    pub total: usize,
    pub success: usize,
    pub failed: usize,
    pub skipped: usize,
}

pub struct Pipeline {
    splitter: Option<Splitter>,
    recognizer: Option<Recognizer>,
    shutdown: Arc<AtomicBool>,
}

impl Pipeline {
    pub fn new(splitter: Option<Splitter>, recognizer: Option<Recognizer>) -> Self {
        Self {
            splitter,
            recognizer,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Stop before the next image once this flag is set. The same flag
    /// should be given to the recognition pool.
    pub fn with_shutdown(mut self, shutdown: Arc<AtomicBool>) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Build the clients `stage` needs from settings.
    ///
    /// Only the credentials of the stages being run are required.
    pub fn from_settings(
        settings: &Settings,
        stage: Stage,
        shutdown: Arc<AtomicBool>,
    ) -> Result<Self, PipelineError> {
        let splitter = if stage.needs_layout() {
            Some(build_splitter(settings)?)
        } else {
            None
        };
        let recognizer = if stage.needs_recognition() {
            Some(build_recognizer(settings, Arc::clone(&shutdown))?)
        } else {
            None
        };
        Ok(Self::new(splitter, recognizer).with_shutdown(shutdown))
    }

    fn splitter(&self) -> Result<&Splitter, PipelineError> {
        self.splitter
            .as_ref()
            .ok_or_else(|| ConfigError::Missing("layout stage is not configured".into()).into())
    }

    fn recognizer(&self) -> Result<&Recognizer, PipelineError> {
        self.recognizer
            .as_ref()
            .ok_or_else(|| ConfigError::Missing("recognition stage is not configured".into()).into())
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }

    /// Run both stages for a single image, ignoring any existing output.
    pub fn process_image(&self, image: &Path, output_dir: &Path) -> Result<String, PipelineError> {
        let name = image_stem(image);
        let document_path = output_dir.join(format!("{name}.md"));
        self.process_item(image, output_dir, &document_path, Stage::Both)?
            .ok_or(PipelineError::EmptyResult(name))
    }

    /// Process every item of `input_dir` into `output_dir`.
    ///
    /// Stage 1 and both take image files; stage 2 takes subdirectories
    /// holding a manifest. With `resume`, items whose output already
    /// exists are skipped and their documents still join the merge.
    pub fn run_folder(
        &self,
        input_dir: &Path,
        output_dir: &Path,
        stage: Stage,
        resume: bool,
    ) -> Result<BatchStats, PipelineError> {
        if stage.needs_layout() {
            self.splitter()?;
        }
        if stage.needs_recognition() {
            self.recognizer()?;
        }
        std::fs::create_dir_all(output_dir)?;

        let items = match stage {
            Stage::Recognize => list_manifest_dirs(input_dir)?,
            Stage::Layout | Stage::Both => list_images(input_dir)?,
        };

        let mut stats = BatchStats {
            total: items.len(),
            ..BatchStats::default()
        };
        let mut documents: Vec<String> = Vec::new();

        tracing::info!(
            input = %input_dir.display(),
            output = %output_dir.display(),
            %stage,
            resume,
            items = items.len(),
            "Batch started"
        );

        for (position, item) in items.iter().enumerate() {
            if self.is_shutdown() {
                tracing::warn!(remaining = items.len() - position, "Shutdown requested, stopping batch");
                break;
            }

            let name = item_name(item, stage);
            let document_path = output_dir.join(format!("{name}.md"));

            if resume {
                let done = match stage {
                    Stage::Layout => has_manifest(&output_dir.join(&name)),
                    Stage::Recognize | Stage::Both => document_path.is_file(),
                };
                if done {
                    tracing::info!(item = %name, "Already processed, skipping");
                    stats.skipped += 1;
                    if stage.needs_recognition() {
                        match std::fs::read_to_string(&document_path) {
                            Ok(doc) => documents.push(doc),
                            Err(e) => tracing::warn!(item = %name, error = %e, "Cannot read existing document"),
                        }
                    }
                    continue;
                }
            }

            tracing::info!(item = %name, position = position + 1, total = items.len(), "Processing");
            match self.process_item(item, output_dir, &document_path, stage) {
                Ok(document) => {
                    stats.success += 1;
                    if let Some(doc) = document {
                        documents.push(doc);
                    }
                }
                Err(PipelineError::Cancelled) => {
                    tracing::error!(item = %name, "Processing cancelled");
                    stats.failed += 1;
                    break;
                }
                Err(e) => {
                    tracing::error!(item = %name, error = %e, "Processing failed");
                    stats.failed += 1;
                }
            }
        }

        if !documents.is_empty() {
            let merged_path = output_dir.join(MERGED_FILE);
            std::fs::write(&merged_path, merge_documents(&documents))?;
            tracing::info!(pages = documents.len(), path = %merged_path.display(), "Merged document written");
        }

        tracing::info!(
            total = stats.total,
            success = stats.success,
            failed = stats.failed,
            skipped = stats.skipped,
            "Batch finished"
        );
        Ok(stats)
    }

    /// Run the requested stages for one item; returns the page document
    /// when Stage 2 ran.
    fn process_item(
        &self,
        item: &Path,
        output_dir: &Path,
        document_path: &Path,
        stage: Stage,
    ) -> Result<Option<String>, PipelineError> {
        let progress_name = item_name(item, stage);
        let mut progress = |done: usize, total: usize, region_id: &str, region_type: &str| {
            tracing::debug!(
                item = %progress_name,
                done,
                total,
                region_id,
                region_type,
                "Region recognized"
            );
        };

        match stage {
            Stage::Layout => {
                self.splitter()?.process(item, output_dir)?;
                Ok(None)
            }
            Stage::Both => {
                self.splitter()?.process(item, output_dir)?;
                let manifest_dir = Splitter::image_dir(output_dir, item);
                let doc = self
                    .recognizer()?
                    .process(&manifest_dir, document_path, Some(&mut progress))?;
                Ok(Some(doc))
            }
            Stage::Recognize => {
                let doc = self
                    .recognizer()?
                    .process(item, document_path, Some(&mut progress))?;
                Ok(Some(doc))
            }
        }
    }
}

fn build_splitter(settings: &Settings) -> Result<Splitter, PipelineError> {
    let layout = &settings.layout;
    let client: Option<Arc<dyn LayoutClient>> = if layout.uses_api() {
        let token = layout.require_token()?;
        let client: Arc<dyn LayoutClient> = match layout.mode {
            LayoutMode::Sync => Arc::new(PaddleVlClient::new(
                layout.require_api_url()?,
                token,
                layout.timeout_secs(),
            )?),
            LayoutMode::Async => Arc::new(PaddleJobClient::new(
                &resolve_job_url(layout.api_url.as_deref()),
                token,
                layout.poll_interval(),
                layout.timeout(),
            )?),
        };
        tracing::info!(client = client.name(), mode = ?layout.mode, "Layout service configured");
        Some(client)
    } else {
        tracing::warn!(
            engine = %layout.engine,
            "Layout engine not available in this build, using grid segmentation"
        );
        None
    };

    Ok(Splitter::new(client, GridLayout::new(layout.grid_rows, layout.grid_cols))
        .with_max_submission_side(layout.max_submission_side))
}

fn build_recognizer(
    settings: &Settings,
    shutdown: Arc<AtomicBool>,
) -> Result<Recognizer, PipelineError> {
    if settings.recognizer.engine != QWEN_VL_ENGINE {
        return Err(ConfigError::Invalid(format!(
            "unsupported recognizer engine '{}'",
            settings.recognizer.engine
        ))
        .into());
    }
    let creds = settings.recognizer_credentials()?;
    let api_key = settings.require_recognizer_key()?;
    let processing = &settings.processing;

    let client = QwenVlClient::new(
        creds.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL),
        api_key,
        creds.model.as_deref().unwrap_or(DEFAULT_MODEL),
        creds.timeout.unwrap_or(DEFAULT_TIMEOUT_SECS),
        processing.max_region_size,
    )
    .map_err(|e| ConfigError::Invalid(format!("recognizer client: {e}")))?;

    tracing::info!(
        model = client.model(),
        concurrency = processing.concurrency,
        request_interval = processing.request_interval,
        "Recognizer ready"
    );

    let pool = RecognitionPool::new(
        Arc::new(client),
        Arc::new(RateLimiter::new(processing.request_interval())),
        RetryPolicy::new(processing.retry_count, processing.retry_base_delay()),
        processing.concurrency,
    )
    .with_shutdown(shutdown);

    Ok(Recognizer::new(pool).with_reuse_region_text(processing.reuse_region_text))
}

/// Output name of an item: the image stem, or the manifest directory name.
fn item_name(item: &Path, stage: Stage) -> String {
    match stage {
        Stage::Recognize => item
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| image_stem(item)),
        Stage::Layout | Stage::Both => image_stem(item),
    }
}

fn is_image_file(path: &Path) -> bool {
    path.is_file()
        && path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| IMAGE_EXTENSIONS.iter().any(|x| x.eq_ignore_ascii_case(ext)))
}

/// Image files directly inside `dir`, sorted by file name.
pub fn list_images(dir: &Path) -> Result<Vec<PathBuf>, PipelineError> {
    let mut images: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| is_image_file(p))
        .collect();
    images.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(images)
}

/// Subdirectories of `dir` that hold a layout manifest, sorted by name.
pub fn list_manifest_dirs(dir: &Path) -> Result<Vec<PathBuf>, PipelineError> {
    let mut dirs: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_dir() && has_manifest(p))
        .collect();
    dirs.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(dirs)
}
