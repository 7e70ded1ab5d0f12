//! Image helpers shared by both stages: cropping, bounded resizing and
//! JPEG encoding.

use std::io::Cursor;

use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, ImageOutputFormat, ImageResult};

use super::region::BBox;

/// JPEG quality for persisted region crops and recognition uploads.
pub const CROP_JPEG_QUALITY: u8 = 90;

/// JPEG quality for downscaled layout submissions.
pub const SUBMISSION_JPEG_QUALITY: u8 = 85;

/// Encode as baseline JPEG. Alpha and 16-bit channels are dropped first.
pub fn encode_jpeg(img: &DynamicImage, quality: u8) -> ImageResult<Vec<u8>> {
    let rgb = DynamicImage::ImageRgb8(img.to_rgb8());
    let mut cursor = Cursor::new(Vec::new());
    rgb.write_to(&mut cursor, ImageOutputFormat::Jpeg(quality))?;
    Ok(cursor.into_inner())
}

/// Cut `bbox` out of `img`. The box must already be clamped to the image.
pub fn crop(img: &DynamicImage, bbox: &BBox) -> DynamicImage {
    img.crop_imm(bbox.x1, bbox.y1, bbox.width(), bbox.height())
}

/// Downscale so the longest side is at most `max_side`.
///
/// Returns the image and the applied scale factor (`1.0` when untouched).
pub fn fit_within(img: &DynamicImage, max_side: u32) -> (DynamicImage, f64) {
    let (w, h) = img.dimensions();
    let longest = w.max(h);
    if max_side == 0 || longest <= max_side {
        return (img.clone(), 1.0);
    }
    let scale = max_side as f64 / longest as f64;
    let nw = ((w as f64 * scale).round() as u32).max(1);
    let nh = ((h as f64 * scale).round() as u32).max(1);
    (img.resize_exact(nw, nh, FilterType::Triangle), scale)
}

/// Upscale so the shortest side is at least `min_side`.
pub fn ensure_min_side(img: DynamicImage, min_side: u32) -> DynamicImage {
    let (w, h) = img.dimensions();
    let shortest = w.min(h);
    if shortest == 0 || shortest >= min_side {
        return img;
    }
    let scale = min_side as f64 / shortest as f64;
    let nw = ((w as f64 * scale).round() as u32).max(min_side);
    let nh = ((h as f64 * scale).round() as u32).max(min_side);
    img.resize_exact(nw, nh, FilterType::CatmullRom)
}

/// The bytes actually uploaded for layout analysis.
pub struct Submission {
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Submitted size divided by source size.
    pub scale: f64,
}

/// Prepare the layout upload for a page.
///
/// Without a limit, or when the page already fits, the original file
/// bytes are sent unchanged. Otherwise a downscaled JPEG copy is made;
/// the source image itself is never modified.
pub fn prepare_submission(
    img: &DynamicImage,
    source_bytes: &[u8],
    max_side: Option<u32>,
) -> ImageResult<Submission> {
    let (w, h) = img.dimensions();
    let limit = match max_side {
        Some(limit) if w.max(h) > limit => limit,
        _ => {
            return Ok(Submission {
                bytes: source_bytes.to_vec(),
                width: w,
                height: h,
                scale: 1.0,
            })
        }
    };
    let (small, scale) = fit_within(img, limit);
    let (sw, sh) = small.dimensions();
    Ok(Submission {
        bytes: encode_jpeg(&small, SUBMISSION_JPEG_QUALITY)?,
        width: sw,
        height: sh,
        scale,
    })
}
