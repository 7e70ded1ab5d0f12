//! Layout segmentation sources.
//!
//! Every source answers the same question through [`LayoutClient`]:
//! given one page image, which blocks does it contain? Implementations:
//! - [`PaddleVlClient`]: hosted PaddleOCR-VL, synchronous request/response
//! - [`PaddleJobClient`]: hosted PaddleOCR-VL, submit/poll/fetch job API
//! - [`GridLayout`]: fixed rows × columns, no network

pub mod grid;
pub mod paddle_jobs;
pub mod paddle_types;
pub mod paddle_vl;

pub use grid::GridLayout;
pub use paddle_jobs::PaddleJobClient;
pub use paddle_vl::PaddleVlClient;

use std::sync::{Mutex, PoisonError};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum LayoutError {
    #[error("Layout API unreachable at {0}")]
    Connection(String),

    #[error("Layout request timed out after {0}s")]
    Timeout(u64),

    #[error("HTTP client error: {0}")]
    Http(String),

    #[error("Layout API returned error (status {status}): {body}")]
    Api { status: u16, body: String },

    #[error("Layout response parsing error: {0}")]
    ResponseParsing(String),

    #[error("Layout API returned no parsing results")]
    EmptyResult,

    #[error("Layout job {job_id} failed: {message}")]
    JobFailed { job_id: String, message: String },

    #[error("Layout job {job_id} did not finish within {timeout_secs}s")]
    JobTimeout { job_id: String, timeout_secs: u64 },

    #[error("Layout API is not configured: {0}")]
    NotConfigured(String),

    #[error("Failed to prepare image for layout submission: {0}")]
    Image(String),
}

/// One page submitted for layout analysis.
///
/// `bytes` is the encoded image actually uploaded (possibly a downscaled
/// copy); `width`/`height` describe that same upload.
pub struct LayoutRequest<'a> {
    pub file_name: &'a str,
    pub bytes: &'a [u8],
    pub width: u32,
    pub height: u32,
}

/// A block as reported by a layout source, in the submitted image's
/// coordinate space.
#[derive(Debug, Clone, PartialEq)]
pub struct LayoutBlock {
    /// `[x1, y1, x2, y2]`
    pub bbox: [f64; 4],
    pub label: String,
    /// Text the layout service already read, kept for reference only.
    pub content: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LayoutResponse {
    /// Whole-page Markdown rendering, if the source produces one.
    pub markdown: String,
    /// Blocks in detection order.
    pub blocks: Vec<LayoutBlock>,
}

/// A source of page regions.
pub trait LayoutClient: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str;

    fn fetch_regions(&self, request: &LayoutRequest<'_>) -> Result<LayoutResponse, LayoutError>;
}

/// Map a reqwest error onto the layout taxonomy.
pub(crate) fn map_http_error(e: reqwest::Error, endpoint: &str, timeout_secs: u64) -> LayoutError {
    if e.is_connect() {
        LayoutError::Connection(endpoint.to_string())
    } else if e.is_timeout() {
        LayoutError::Timeout(timeout_secs)
    } else {
        LayoutError::Http(e.to_string())
    }
}

// ──────────────────────────────────────────────
// MockLayoutClient (testing)
// ──────────────────────────────────────────────

/// Layout source returning a fixed response, or failing on demand.
/// Every upload is recorded as `(file_name, bytes)`.
pub struct MockLayoutClient {
    response: LayoutResponse,
    fail: bool,
    uploads: Mutex<Vec<(String, Vec<u8>)>>,
}

impl MockLayoutClient {
    pub fn new(blocks: Vec<LayoutBlock>) -> Self {
        Self {
            response: LayoutResponse {
                markdown: String::new(),
                blocks,
            },
            fail: false,
            uploads: Mutex::new(Vec::new()),
        }
    }

    pub fn with_markdown(mut self, markdown: &str) -> Self {
        self.response.markdown = markdown.to_string();
        self
    }

    pub fn failing() -> Self {
        Self {
            response: LayoutResponse::default(),
            fail: true,
            uploads: Mutex::new(Vec::new()),
        }
    }

    pub fn uploads(&self) -> Vec<(String, Vec<u8>)> {
        self.uploads
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl LayoutClient for MockLayoutClient {
    fn name(&self) -> &str {
        "mock"
    }

    fn fetch_regions(&self, request: &LayoutRequest<'_>) -> Result<LayoutResponse, LayoutError> {
        self.uploads
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((request.file_name.to_string(), request.bytes.to_vec()));
        if self.fail {
            return Err(LayoutError::Api {
                status: 500,
                body: "mock failure".into(),
            });
        }
        Ok(self.response.clone())
    }
}
