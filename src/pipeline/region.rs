//! Region model: one rectangular content block of a page.
//!
//! Coordinates are always in source-image pixel space. Boxes coming back
//! from a layout service are raw floats; they only become a [`BBox`] after
//! clamping to the image, which is where degenerate boxes are dropped.

use image::DynamicImage;
use serde::{Deserialize, Serialize};

/// Axis-aligned box, `x1 < x2` and `y1 < y2`, inside the owning image.
///
/// Serialized as `[x1, y1, x2, y2]` to match the manifest format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "[u32; 4]", into = "[u32; 4]")]
pub struct BBox {
    pub x1: u32,
    pub y1: u32,
    pub x2: u32,
    pub y2: u32,
}

impl From<[u32; 4]> for BBox {
    fn from(v: [u32; 4]) -> Self {
        Self {
            x1: v[0],
            y1: v[1],
            x2: v[2],
            y2: v[3],
        }
    }
}

impl From<BBox> for [u32; 4] {
    fn from(b: BBox) -> Self {
        [b.x1, b.y1, b.x2, b.y2]
    }
}

impl BBox {
    /// The whole image as one box.
    pub fn full(width: u32, height: u32) -> Self {
        Self {
            x1: 0,
            y1: 0,
            x2: width,
            y2: height,
        }
    }

    /// Clamp a raw `[x1, y1, x2, y2]` box to `width × height`.
    ///
    /// Fractional coordinates are truncated. Returns `None` when nothing
    /// of the box remains inside the image.
    pub fn clamped(raw: [f64; 4], width: u32, height: u32) -> Option<Self> {
        let clamp = |v: f64, max: u32| -> u32 {
            if !v.is_finite() || v <= 0.0 {
                0
            } else {
                (v.trunc() as u64).min(max as u64) as u32
            }
        };
        let bbox = Self {
            x1: clamp(raw[0], width),
            y1: clamp(raw[1], height),
            x2: clamp(raw[2], width),
            y2: clamp(raw[3], height),
        };
        (bbox.x2 > bbox.x1 && bbox.y2 > bbox.y1).then_some(bbox)
    }

    pub fn width(&self) -> u32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> u32 {
        self.y2 - self.y1
    }

    pub fn fits_within(&self, width: u32, height: u32) -> bool {
        self.x1 < self.x2 && self.y1 < self.y2 && self.x2 <= width && self.y2 <= height
    }
}

/// Map a raw box from a resized image back to the original, rounding to
/// the nearest pixel.
pub fn restore_box(raw: [f64; 4], scale: f64) -> [f64; 4] {
    if scale <= 0.0 || (scale - 1.0).abs() < f64::EPSILON {
        return raw;
    }
    raw.map(|v| (v / scale).round())
}

/// How a region is formatted and prompted. Derived from the free-form label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionKind {
    Title,
    Table,
    Text,
}

impl RegionKind {
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "title" | "doc_title" | "paragraph_title" => RegionKind::Title,
            "table" => RegionKind::Table,
            _ => RegionKind::Text,
        }
    }
}

/// One region as recorded in the manifest, plus its transient pixel data.
#[derive(Clone, Serialize, Deserialize)]
pub struct Region {
    /// Stable identifier, unique within one manifest (`0001`, `0002`, ...).
    #[serde(default)]
    pub id: String,
    /// Free-form label: `text`, `title`, `table`, `image`, ...
    pub region_type: String,
    pub bbox: BBox,
    #[serde(default = "default_confidence")]
    pub confidence: f32,
    /// Reading order. Absent in hand-edited manifests.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<u32>,
    /// Crop path relative to the manifest directory.
    #[serde(default)]
    pub image_file: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip)]
    pub image: Option<DynamicImage>,
}

fn default_confidence() -> f32 {
    1.0
}

impl std::fmt::Debug for Region {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Region")
            .field("id", &self.id)
            .field("region_type", &self.region_type)
            .field("bbox", &self.bbox)
            .field("order", &self.order)
            .field("has_image", &self.image.is_some())
            .field("text_len", &self.text.as_ref().map(|t| t.len()))
            .finish()
    }
}

impl Region {
    pub fn new(region_type: &str, bbox: BBox, confidence: f32, order: u32) -> Self {
        Self {
            id: String::new(),
            region_type: region_type.to_string(),
            bbox,
            confidence,
            order: Some(order),
            image_file: String::new(),
            text: None,
            image: None,
        }
    }

    pub fn kind(&self) -> RegionKind {
        RegionKind::from_label(&self.region_type)
    }
}

/// 1-based, zero-padded region identifier.
pub fn region_id(index: usize) -> String {
    format!("{:04}", index + 1)
}

/// Relative crop path for a region identifier.
pub fn crop_file_name(id: &str) -> String {
    format!("regions/{id}.jpg")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamp_inside_box_is_unchanged() {
        let b = BBox::clamped([10.0, 20.0, 30.0, 40.0], 100, 100).unwrap();
        assert_eq!(b, BBox { x1: 10, y1: 20, x2: 30, y2: 40 });
    }

    #[test]
    fn clamp_pulls_box_into_bounds() {
        let b = BBox::clamped([-5.0, -1.0, 150.0, 80.7], 100, 50).unwrap();
        assert_eq!(b, BBox { x1: 0, y1: 0, x2: 100, y2: 50 });
        assert!(b.fits_within(100, 50));
    }

    #[test]
    fn clamp_rejects_degenerate_boxes() {
        assert!(BBox::clamped([50.0, 10.0, 50.0, 20.0], 100, 100).is_none());
        assert!(BBox::clamped([60.0, 10.0, 40.0, 20.0], 100, 100).is_none());
        assert!(BBox::clamped([120.0, 10.0, 140.0, 20.0], 100, 100).is_none());
        assert!(BBox::clamped([f64::NAN, 0.0, 10.0, 10.0], 100, 100).is_some());
    }

    #[test]
    fn clamp_property_holds_over_a_sweep() {
        let (w, h) = (640u32, 480u32);
        for x in (-100..800).step_by(37) {
            for y in (-100..600).step_by(41) {
                let raw = [x as f64, y as f64, (x + 150) as f64, (y + 90) as f64];
                if let Some(b) = BBox::clamped(raw, w, h) {
                    assert!(b.x1 < b.x2 && b.x2 <= w, "{b:?}");
                    assert!(b.y1 < b.y2 && b.y2 <= h, "{b:?}");
                }
            }
        }
    }

    fn scale_box(raw: [f64; 4], scale: f64) -> [f64; 4] {
        raw.map(|v| v * scale)
    }

    #[test]
    fn rescale_round_trip_within_one_pixel() {
        let boxes = [
            [0.0, 0.0, 4000.0, 6000.0],
            [1001.0, 333.0, 2777.0, 5999.0],
            [17.0, 23.0, 29.0, 31.0],
        ];
        for scale in [0.25, 0.3333, 0.41666, 0.5, 0.9, 1.0] {
            for b in boxes {
                let back = restore_box(scale_box(b, scale), scale);
                for (orig, got) in b.iter().zip(back.iter()) {
                    assert!((orig - got).abs() <= 1.0, "scale {scale}: {orig} vs {got}");
                }
            }
        }
    }

    #[test]
    fn restore_with_unit_scale_is_identity() {
        let raw = [1.5, 2.5, 3.5, 4.5];
        assert_eq!(restore_box(raw, 1.0), raw);
    }

    #[test]
    fn bbox_serializes_as_array() {
        let b = BBox { x1: 1, y1: 2, x2: 3, y2: 4 };
        assert_eq!(serde_json::to_string(&b).unwrap(), "[1,2,3,4]");
        let parsed: BBox = serde_json::from_str("[5,6,7,8]").unwrap();
        assert_eq!(parsed, BBox { x1: 5, y1: 6, x2: 7, y2: 8 });
    }

    #[test]
    fn region_kind_from_labels() {
        assert_eq!(RegionKind::from_label("title"), RegionKind::Title);
        assert_eq!(RegionKind::from_label("doc_title"), RegionKind::Title);
        assert_eq!(RegionKind::from_label("paragraph_title"), RegionKind::Title);
        assert_eq!(RegionKind::from_label("table"), RegionKind::Table);
        assert_eq!(RegionKind::from_label("text"), RegionKind::Text);
        assert_eq!(RegionKind::from_label("image"), RegionKind::Text);
    }

    #[test]
    fn region_ids_are_zero_padded() {
        assert_eq!(region_id(0), "0001");
        assert_eq!(region_id(41), "0042");
        assert_eq!(crop_file_name("0042"), "regions/0042.jpg");
    }
}
