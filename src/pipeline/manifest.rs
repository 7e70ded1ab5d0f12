//! Per-image layout manifest (`layout.json`).
//!
//! Created by Stage 1, text fields filled in by Stage 2, never deleted.
//! It is the resumable checkpoint for an image.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::region::Region;
use super::PipelineError;

pub const MANIFEST_FILE: &str = "layout.json";
pub const REGIONS_DIR: &str = "regions";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayoutManifest {
    pub image_name: String,
    /// `[width, height]` of the source image.
    pub image_size: [u32; 2],
    pub total_regions: usize,
    pub regions: Vec<Region>,
}

impl LayoutManifest {
    pub fn new(image_name: &str, width: u32, height: u32, regions: Vec<Region>) -> Self {
        Self {
            image_name: image_name.to_string(),
            image_size: [width, height],
            total_regions: regions.len(),
            regions,
        }
    }

    /// Indices into `regions` in reading order.
    ///
    /// Explicit `order` wins when every region has one; otherwise
    /// top-to-bottom, then left-to-right.
    pub fn reading_order(&self) -> Vec<usize> {
        let mut indices: Vec<usize> = (0..self.regions.len()).collect();
        if !self.regions.is_empty() && self.regions.iter().all(|r| r.order.is_some()) {
            indices.sort_by_key(|&i| self.regions[i].order);
        } else {
            indices.sort_by_key(|&i| (self.regions[i].bbox.y1, self.regions[i].bbox.x1));
        }
        indices
    }
}

pub fn manifest_path(image_dir: &Path) -> PathBuf {
    image_dir.join(MANIFEST_FILE)
}

pub fn has_manifest(image_dir: &Path) -> bool {
    manifest_path(image_dir).is_file()
}

pub fn load_manifest(image_dir: &Path) -> Result<LayoutManifest, PipelineError> {
    let path = manifest_path(image_dir);
    if !path.is_file() {
        return Err(PipelineError::ManifestMissing(path));
    }
    let contents = std::fs::read_to_string(&path)?;
    serde_json::from_str(&contents).map_err(|e| PipelineError::ManifestInvalid {
        path,
        reason: e.to_string(),
    })
}

pub fn save_manifest(image_dir: &Path, manifest: &LayoutManifest) -> Result<(), PipelineError> {
    let path = manifest_path(image_dir);
    let json = serde_json::to_string_pretty(manifest).map_err(|e| {
        PipelineError::ManifestInvalid {
            path: path.clone(),
            reason: e.to_string(),
        }
    })?;
    std::fs::write(&path, json)?;
    Ok(())
}
