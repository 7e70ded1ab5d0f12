//! Region text recognition.
//!
//! [`RegionRecognizer`] is the single seam to a vision-language model.
//! Around it sit the process-wide [`RateLimiter`], the per-request
//! [`RetryPolicy`] and the bounded [`RecognitionPool`] that Stage 2
//! dispatches through.

pub mod pool;
pub mod prompt;
pub mod qwen_vl;
pub mod rate_limit;
pub mod retry;

pub use pool::{RecognitionPool, RegionJob};
pub use qwen_vl::QwenVlClient;
pub use rate_limit::RateLimiter;
pub use retry::{RegionOutcome, RetryPolicy, CONTENT_BLOCKED_TEXT, RETRY_EXHAUSTED_TEXT};

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use image::DynamicImage;
use thiserror::Error;

use super::region::RegionKind;

#[derive(Error, Debug)]
pub enum RecognitionError {
    #[error("Recognition request timed out after {0}s")]
    Timeout(u64),

    #[error("Recognition API unreachable at {0}")]
    Connection(String),

    #[error("Recognition API rate limited: {0}")]
    RateLimited(String),

    #[error("Region rejected by content inspection: {0}")]
    ContentPolicy(String),

    #[error("Recognition API returned error (status {status}): {body}")]
    Api { status: u16, body: String },

    #[error("HTTP client error: {0}")]
    Http(String),

    #[error("Recognition response parsing error: {0}")]
    ResponseParsing(String),

    #[error("Failed to prepare region image: {0}")]
    Image(String),
}

impl RecognitionError {
    /// Worth another attempt after a backoff.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RecognitionError::Timeout(_)
                | RecognitionError::Connection(_)
                | RecognitionError::RateLimited(_)
        )
    }
}

/// Reads the text of one region image.
pub trait RegionRecognizer: Send + Sync {
    fn recognize(&self, image: &DynamicImage, kind: RegionKind)
        -> Result<String, RecognitionError>;
}

// ──────────────────────────────────────────────
// MockRecognizer (testing)
// ──────────────────────────────────────────────

/// Recognizer that replays scripted results, then a fixed text.
pub struct MockRecognizer {
    script: Mutex<VecDeque<Result<String, RecognitionError>>>,
    fallback: String,
    calls: AtomicUsize,
}

impl MockRecognizer {
    pub fn new(text: &str) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: text.to_string(),
            calls: AtomicUsize::new(0),
        }
    }

    /// Results returned, in order, before falling back to the fixed text.
    pub fn with_script(mut self, results: Vec<Result<String, RecognitionError>>) -> Self {
        self.script = Mutex::new(results.into());
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl RegionRecognizer for MockRecognizer {
    fn recognize(
        &self,
        _image: &DynamicImage,
        _kind: RegionKind,
    ) -> Result<String, RecognitionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self
            .script
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .pop_front();
        next.unwrap_or_else(|| Ok(self.fallback.clone()))
    }
}

/// Recognizer that always fails with a freshly built error.
pub struct FailingRecognizer {
    make_error: fn() -> RecognitionError,
    calls: AtomicUsize,
}

impl FailingRecognizer {
    pub fn new(make_error: fn() -> RecognitionError) -> Self {
        Self {
            make_error,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl RegionRecognizer for FailingRecognizer {
    fn recognize(
        &self,
        _image: &DynamicImage,
        _kind: RegionKind,
    ) -> Result<String, RecognitionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err((self.make_error)())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(RecognitionError::Timeout(60).is_transient());
        assert!(RecognitionError::Connection("x".into()).is_transient());
        assert!(RecognitionError::RateLimited("quota".into()).is_transient());
        assert!(!RecognitionError::ContentPolicy("x".into()).is_transient());
        assert!(!RecognitionError::Api {
            status: 500,
            body: String::new()
        }
        .is_transient());
        assert!(!RecognitionError::ResponseParsing("x".into()).is_transient());
    }

    #[test]
    fn mock_replays_script_then_fallback() {
        let mock = MockRecognizer::new("done").with_script(vec![
            Err(RecognitionError::Timeout(1)),
            Ok("first".into()),
        ]);
        let img = DynamicImage::new_rgb8(1, 1);
        assert!(mock.recognize(&img, RegionKind::Text).is_err());
        assert_eq!(mock.recognize(&img, RegionKind::Text).unwrap(), "first");
        assert_eq!(mock.recognize(&img, RegionKind::Text).unwrap(), "done");
        assert_eq!(mock.calls(), 3);
    }

    #[test]
    fn recognizer_is_object_safe() {
        fn _assert(_: &dyn RegionRecognizer) {}
    }
}
