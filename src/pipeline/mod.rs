//! Two-stage OCR pipeline for scanned newspaper pages.
//!
//! Stage 1 ([`splitter`]) segments a page into regions and persists the
//! crops plus a [`manifest::LayoutManifest`]. Stage 2 ([`recognizer`])
//! reads each region through a vision-language model and merges the
//! results into a Markdown document. [`orchestrator`] drives both over a
//! folder with resume, and [`fix`] re-runs failed pages.

pub mod fix;
pub mod imaging;
pub mod layout;
pub mod manifest;
pub mod merge;
pub mod orchestrator;
pub mod recognition;
pub mod recognizer;
pub mod region;
pub mod splitter;
#[cfg(test)]
pub(crate) mod stub_http;

use std::path::PathBuf;

use thiserror::Error;

use crate::config::ConfigError;
use layout::LayoutError;

pub use orchestrator::{BatchStats, Pipeline, Stage};
pub use recognizer::Recognizer;
pub use splitter::Splitter;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Cannot read image {path}: {reason}")]
    ImageRead { path: PathBuf, reason: String },

    #[error("No layout manifest at {0}")]
    ManifestMissing(PathBuf),

    #[error("Invalid layout manifest {path}: {reason}")]
    ManifestInvalid { path: PathBuf, reason: String },

    #[error("Layout analysis failed: {0}")]
    Layout(#[from] LayoutError),

    #[error("No text recognized for {0}")]
    EmptyResult(String),

    #[error("Cannot write image {path}: {reason}")]
    ImageWrite { path: PathBuf, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Processing cancelled")]
    Cancelled,
}
