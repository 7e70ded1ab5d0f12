//! Stage 1: segment a page into regions and persist the crops.
//!
//! Output layout for `page.jpg`:
//!
//! ```text
//! <output>/page/layout.json
//! <output>/page/page_layout_raw.md      (layout service Markdown, if any)
//! <output>/page/regions/0001.jpg ...
//! ```
//!
//! Region sources, first non-empty wins: the layout service, the fixed
//! grid, the whole page. Crops always come from the full-resolution
//! source, even when a downscaled copy was submitted.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use image::{DynamicImage, GenericImageView};

use super::imaging::{crop, encode_jpeg, prepare_submission, CROP_JPEG_QUALITY};
use super::layout::{GridLayout, LayoutBlock, LayoutClient, LayoutError, LayoutRequest};
use super::manifest::{save_manifest, LayoutManifest, REGIONS_DIR};
use super::region::{crop_file_name, region_id, restore_box, BBox, Region};
use super::PipelineError;

pub struct Splitter {
    layout: Option<Arc<dyn LayoutClient>>,
    grid: GridLayout,
    max_submission_side: Option<u32>,
}

impl Splitter {
    /// `layout` is the remote service; `None` means grid-only segmentation.
    pub fn new(layout: Option<Arc<dyn LayoutClient>>, grid: GridLayout) -> Self {
        Self {
            layout,
            grid,
            max_submission_side: None,
        }
    }

    /// Downscale the copy sent to the layout service beyond this side.
    pub fn with_max_submission_side(mut self, max_side: Option<u32>) -> Self {
        self.max_submission_side = max_side;
        self
    }

    /// Directory holding the manifest and crops of `image_path`.
    pub fn image_dir(output_dir: &Path, image_path: &Path) -> PathBuf {
        output_dir.join(image_stem(image_path))
    }

    pub fn process(
        &self,
        image_path: &Path,
        output_dir: &Path,
    ) -> Result<LayoutManifest, PipelineError> {
        let stem = image_stem(image_path);
        let _span = tracing::info_span!("split", image = %stem).entered();

        let bytes = std::fs::read(image_path).map_err(|e| PipelineError::ImageRead {
            path: image_path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let source = image::load_from_memory(&bytes).map_err(|e| PipelineError::ImageRead {
            path: image_path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let (width, height) = source.dimensions();

        let image_dir = output_dir.join(&stem);
        std::fs::create_dir_all(&image_dir)?;

        let mut regions = match &self.layout {
            Some(client) => {
                let blocks =
                    self.fetch_blocks(client.as_ref(), &source, &bytes, image_path, &image_dir)?;
                regions_from_blocks(&blocks, width, height)
            }
            None => Vec::new(),
        };

        if regions.is_empty() {
            if self.layout.is_some() {
                tracing::warn!("Layout service found no usable regions, using grid");
            }
            let cells: Vec<LayoutBlock> = self
                .grid
                .cells(width, height)
                .into_iter()
                .map(|bbox| LayoutBlock {
                    bbox,
                    label: "text".to_string(),
                    content: String::new(),
                })
                .collect();
            regions = regions_from_blocks(&cells, width, height);
        }

        if regions.is_empty() {
            tracing::warn!("No regions found, using the whole page");
            regions.push(Region::new("text", BBox::full(width, height), 1.0, 0));
        }

        write_crops(&source, &image_dir, &mut regions)?;

        let manifest = LayoutManifest::new(&stem, width, height, regions);
        save_manifest(&image_dir, &manifest)?;

        tracing::info!(
            regions = manifest.total_regions,
            width,
            height,
            "Layout manifest written"
        );
        Ok(manifest)
    }

    /// Ask the layout service for blocks, mapped back to source coordinates.
    fn fetch_blocks(
        &self,
        client: &dyn LayoutClient,
        source: &DynamicImage,
        bytes: &[u8],
        image_path: &Path,
        image_dir: &Path,
    ) -> Result<Vec<LayoutBlock>, PipelineError> {
        let submission = prepare_submission(source, bytes, self.max_submission_side)
            .map_err(|e| LayoutError::Image(e.to_string()))?;
        if submission.scale < 1.0 {
            tracing::info!(
                width = submission.width,
                height = submission.height,
                scale = submission.scale,
                "Submitting downscaled copy for layout"
            );
        }

        let stem = image_stem(image_path);
        let file_name = upload_file_name(image_path, submission.scale);
        let response = client.fetch_regions(&LayoutRequest {
            file_name: &file_name,
            bytes: &submission.bytes,
            width: submission.width,
            height: submission.height,
        })?;

        if !response.markdown.is_empty() {
            let raw_path = image_dir.join(format!("{stem}_layout_raw.md"));
            std::fs::write(raw_path, &response.markdown)?;
        }

        Ok(response
            .blocks
            .into_iter()
            .map(|mut block| {
                block.bbox = restore_box(block.bbox, submission.scale);
                block
            })
            .collect())
    }
}

/// Name sent with the upload: the source file name when its bytes go
/// out unchanged, `<stem>.jpg` for a re-encoded copy.
fn upload_file_name(image_path: &Path, scale: f64) -> String {
    match image_path.file_name() {
        Some(name) if scale >= 1.0 => name.to_string_lossy().into_owned(),
        _ => format!("{}.jpg", image_stem(image_path)),
    }
}

/// Clamp blocks to the page; degenerate ones are dropped.
fn regions_from_blocks(blocks: &[LayoutBlock], width: u32, height: u32) -> Vec<Region> {
    blocks
        .iter()
        .enumerate()
        .filter_map(|(order, block)| match BBox::clamped(block.bbox, width, height) {
            Some(bbox) => Some(Region::new(&block.label, bbox, 1.0, order as u32)),
            None => {
                tracing::warn!(order, bbox = ?block.bbox, "Skipping degenerate region");
                None
            }
        })
        .collect()
}

/// Number the regions and write one JPEG per region, replacing old crops.
fn write_crops(
    source: &DynamicImage,
    image_dir: &Path,
    regions: &mut [Region],
) -> Result<(), PipelineError> {
    let regions_dir = image_dir.join(REGIONS_DIR);
    if regions_dir.exists() {
        std::fs::remove_dir_all(&regions_dir)?;
    }
    std::fs::create_dir_all(&regions_dir)?;

    for (index, region) in regions.iter_mut().enumerate() {
        region.id = region_id(index);
        region.image_file = crop_file_name(&region.id);

        let path = image_dir.join(&region.image_file);
        let jpeg = encode_jpeg(&crop(source, &region.bbox), CROP_JPEG_QUALITY).map_err(|e| {
            PipelineError::ImageWrite {
                path: path.clone(),
                reason: e.to_string(),
            }
        })?;
        std::fs::write(&path, jpeg)?;
    }
    Ok(())
}

pub(crate) fn image_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::layout::MockLayoutClient;
    use crate::pipeline::manifest::load_manifest;
    use image::RgbImage;

    fn write_page(dir: &Path, name: &str, w: u32, h: u32) -> PathBuf {
        let path = dir.join(name);
        DynamicImage::ImageRgb8(RgbImage::from_pixel(w, h, image::Rgb([240, 240, 230])))
            .save(&path)
            .unwrap();
        path
    }

    fn block(bbox: [f64; 4], label: &str) -> LayoutBlock {
        LayoutBlock {
            bbox,
            label: label.into(),
            content: String::new(),
        }
    }

    #[test]
    fn grid_only_split_writes_twelve_crops() {
        let tmp = tempfile::tempdir().unwrap();
        let page = write_page(tmp.path(), "page.png", 400, 300);
        let out = tmp.path().join("out");

        let manifest = Splitter::new(None, GridLayout::new(3, 4))
            .process(&page, &out)
            .unwrap();

        assert_eq!(manifest.total_regions, 12);
        assert_eq!(manifest.image_name, "page");
        assert_eq!(manifest.image_size, [400, 300]);
        assert_eq!(manifest.regions[0].id, "0001");
        assert!(out.join("page/regions/0012.jpg").is_file());
        assert!(out.join("page/layout.json").is_file());
        assert!(!out.join("page/page_layout_raw.md").exists());
    }

    #[test]
    fn api_blocks_are_clamped_and_degenerate_ones_skipped() {
        let tmp = tempfile::tempdir().unwrap();
        let page = write_page(tmp.path(), "p1.jpg", 200, 100);
        let out = tmp.path().join("out");
        let client = MockLayoutClient::new(vec![
            block([10.0, 10.0, 90.0, 40.0], "doc_title"),
            block([150.0, 50.0, 150.0, 80.0], "text"),
            block([-20.0, 50.0, 500.0, 150.0], "text"),
        ])
        .with_markdown("## raw");

        let manifest = Splitter::new(Some(Arc::new(client)), GridLayout::new(3, 4))
            .process(&page, &out)
            .unwrap();

        assert_eq!(manifest.total_regions, 2);
        assert_eq!(manifest.regions[0].region_type, "doc_title");
        assert_eq!(manifest.regions[0].order, Some(0));
        assert_eq!(manifest.regions[1].order, Some(2));
        assert_eq!(manifest.regions[1].id, "0002");
        assert_eq!(manifest.regions[1].bbox, BBox { x1: 0, y1: 50, x2: 200, y2: 100 });
        for r in &manifest.regions {
            assert!(r.bbox.fits_within(200, 100));
        }
        assert_eq!(
            std::fs::read_to_string(out.join("p1/p1_layout_raw.md")).unwrap(),
            "## raw"
        );
    }

    #[test]
    fn empty_api_result_falls_back_to_grid() {
        let tmp = tempfile::tempdir().unwrap();
        let page = write_page(tmp.path(), "p.png", 120, 90);
        let client = MockLayoutClient::new(Vec::new());
        let manifest = Splitter::new(Some(Arc::new(client)), GridLayout::new(3, 4))
            .process(&page, &tmp.path().join("out"))
            .unwrap();
        assert_eq!(manifest.total_regions, 12);
    }

    #[test]
    fn api_failure_fails_the_image() {
        let tmp = tempfile::tempdir().unwrap();
        let page = write_page(tmp.path(), "p.png", 50, 50);
        let err = Splitter::new(Some(Arc::new(MockLayoutClient::failing())), GridLayout::new(3, 4))
            .process(&page, &tmp.path().join("out"))
            .unwrap_err();
        assert!(matches!(err, PipelineError::Layout(_)));
    }

    #[test]
    fn tiny_page_still_yields_a_region() {
        let tmp = tempfile::tempdir().unwrap();
        let page = write_page(tmp.path(), "dot.png", 1, 1);
        let manifest = Splitter::new(None, GridLayout::new(3, 4))
            .process(&page, &tmp.path().join("out"))
            .unwrap();
        assert_eq!(manifest.total_regions, 1);
        assert_eq!(manifest.regions[0].bbox, BBox::full(1, 1));
    }

    #[test]
    fn unreadable_image_is_image_read_error() {
        let tmp = tempfile::tempdir().unwrap();
        let bogus = tmp.path().join("bad.jpg");
        std::fs::write(&bogus, b"not an image").unwrap();
        let err = Splitter::new(None, GridLayout::new(3, 4))
            .process(&bogus, &tmp.path().join("out"))
            .unwrap_err();
        assert!(matches!(err, PipelineError::ImageRead { .. }));

        let err = Splitter::new(None, GridLayout::new(3, 4))
            .process(&tmp.path().join("missing.jpg"), &tmp.path().join("out"))
            .unwrap_err();
        assert!(matches!(err, PipelineError::ImageRead { .. }));
    }

    #[test]
    fn rerun_replaces_stale_crops() {
        let tmp = tempfile::tempdir().unwrap();
        let page = write_page(tmp.path(), "p.png", 100, 100);
        let out = tmp.path().join("out");

        Splitter::new(None, GridLayout::new(3, 4)).process(&page, &out).unwrap();
        assert!(out.join("p/regions/0012.jpg").is_file());

        let manifest = Splitter::new(None, GridLayout::new(1, 2)).process(&page, &out).unwrap();
        assert_eq!(manifest.total_regions, 2);
        assert!(!out.join("p/regions/0003.jpg").exists());
        let loaded = load_manifest(&out.join("p")).unwrap();
        assert_eq!(loaded.total_regions, 2);
    }

    #[test]
    fn downscaled_submission_boxes_map_back_to_source() {
        let tmp = tempfile::tempdir().unwrap();
        let page = write_page(tmp.path(), "big.png", 400, 200);
        // Boxes as seen on the 100×50 submission.
        let client = MockLayoutClient::new(vec![block([25.0, 0.0, 50.0, 25.0], "text")]);
        let manifest = Splitter::new(Some(Arc::new(client)), GridLayout::new(3, 4))
            .with_max_submission_side(Some(100))
            .process(&page, &tmp.path().join("out"))
            .unwrap();
        assert_eq!(manifest.regions[0].bbox, BBox { x1: 100, y1: 0, x2: 200, y2: 100 });
    }

    #[test]
    fn unchanged_upload_keeps_source_file_name() {
        let tmp = tempfile::tempdir().unwrap();
        let page = write_page(tmp.path(), "p.png", 50, 50);
        let client = Arc::new(MockLayoutClient::new(vec![block([0.0, 0.0, 50.0, 50.0], "text")]));
        Splitter::new(Some(client.clone() as Arc<dyn LayoutClient>), GridLayout::new(3, 4))
            .with_max_submission_side(Some(100))
            .process(&page, &tmp.path().join("out"))
            .unwrap();

        let uploads = client.uploads();
        assert_eq!(uploads.len(), 1);
        assert_eq!(uploads[0].0, "p.png");
        assert_eq!(uploads[0].1, std::fs::read(&page).unwrap());
    }

    #[test]
    fn downscaled_upload_is_a_real_jpeg() {
        let tmp = tempfile::tempdir().unwrap();
        let page = write_page(tmp.path(), "big.png", 400, 200);
        let client = Arc::new(MockLayoutClient::new(vec![block([0.0, 0.0, 10.0, 10.0], "text")]));
        Splitter::new(Some(client.clone() as Arc<dyn LayoutClient>), GridLayout::new(3, 4))
            .with_max_submission_side(Some(100))
            .process(&page, &tmp.path().join("out"))
            .unwrap();

        let uploads = client.uploads();
        assert_eq!(uploads[0].0, "big.jpg");
        assert_eq!(&uploads[0].1[..3], &[0xFFu8, 0xD8, 0xFF]);
        let decoded = image::load_from_memory(&uploads[0].1).unwrap();
        assert_eq!(decoded.dimensions(), (100, 50));
    }

    #[test]
    fn every_crop_matches_its_box() {
        let tmp = tempfile::tempdir().unwrap();
        let page = write_page(tmp.path(), "p.png", 97, 61);
        let out = tmp.path().join("out");
        let manifest = Splitter::new(None, GridLayout::new(3, 4)).process(&page, &out).unwrap();
        for r in &manifest.regions {
            let crop = image::open(out.join("p").join(&r.image_file)).unwrap();
            assert_eq!(crop.dimensions(), (r.bbox.width(), r.bbox.height()));
        }
    }
}
