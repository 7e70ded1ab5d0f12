//! Fixed-grid fallback layout.
//!
//! Used when no layout service is configured or the service found
//! nothing. Cells are emitted top band first and right to left within a
//! band, the reading order of vertically set newspaper columns.

use super::{LayoutBlock, LayoutClient, LayoutError, LayoutRequest, LayoutResponse};
use crate::config::MAX_GRID_SIDE;

pub struct GridLayout {
    rows: u32,
    cols: u32,
}

impl GridLayout {
    /// Rows and columns are clamped to `1..=MAX_GRID_SIDE`.
    pub fn new(rows: u32, cols: u32) -> Self {
        Self {
            rows: rows.clamp(1, MAX_GRID_SIDE),
            cols: cols.clamp(1, MAX_GRID_SIDE),
        }
    }

    /// Cell boxes for a `width × height` page. The last row and column
    /// absorb any remainder so the grid covers the whole page.
    pub fn cells(&self, width: u32, height: u32) -> Vec<[f64; 4]> {
        let cell_w = width / self.cols;
        let cell_h = height / self.rows;
        let mut cells = Vec::with_capacity(self.rows as usize * self.cols as usize);
        for row in 0..self.rows {
            let y1 = row * cell_h;
            let y2 = if row + 1 == self.rows { height } else { y1 + cell_h };
            for col in (0..self.cols).rev() {
                let x1 = col * cell_w;
                let x2 = if col + 1 == self.cols { width } else { x1 + cell_w };
                if x2 > x1 && y2 > y1 {
                    cells.push([x1 as f64, y1 as f64, x2 as f64, y2 as f64]);
                }
            }
        }
        cells
    }
}

impl LayoutClient for GridLayout {
    fn name(&self) -> &str {
        "grid"
    }

    fn fetch_regions(&self, request: &LayoutRequest<'_>) -> Result<LayoutResponse, LayoutError> {
        let blocks = self
            .cells(request.width, request.height)
            .into_iter()
            .map(|bbox| LayoutBlock {
                bbox,
                label: "text".to_string(),
                content: String::new(),
            })
            .collect();
        Ok(LayoutResponse {
            markdown: String::new(),
            blocks,
        })
    }
}
