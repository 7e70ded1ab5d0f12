//! Per-region retry with exponential backoff.
//!
//! Failures never leave this module as errors: every request resolves to
//! a [`RegionOutcome`], whose text is what ends up in the document.

use std::time::Duration;

use image::DynamicImage;

use super::rate_limit::RateLimiter;
use super::{RecognitionError, RegionRecognizer};
use crate::pipeline::region::RegionKind;

/// Region text when every attempt failed transiently.
pub const RETRY_EXHAUSTED_TEXT: &str =
    "<!-- error: retry_exhausted --> **【API请求超时/受限，未获取结果】**";

/// Region text when the API refused the image on content grounds.
pub const CONTENT_BLOCKED_TEXT: &str =
    "<!-- error: content_blocked --> **【内容被API屏蔽，请人工核对】**";

/// True for texts produced by a failed recognition.
pub fn is_failure_text(text: &str) -> bool {
    text == RETRY_EXHAUSTED_TEXT || text == CONTENT_BLOCKED_TEXT
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Wait after the first failure; doubled after each further failure.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// Backoff after the failed attempt number `attempt` (0-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(1u32 << attempt.min(16))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegionOutcome {
    Recognized(String),
    /// Content inspection rejected the region.
    Blocked,
    /// Every attempt failed transiently.
    Exhausted,
    /// A non-retryable error; the region contributes no text.
    Failed,
}

impl RegionOutcome {
    pub fn text(&self) -> &str {
        match self {
            RegionOutcome::Recognized(text) => text,
            RegionOutcome::Blocked => CONTENT_BLOCKED_TEXT,
            RegionOutcome::Exhausted => RETRY_EXHAUSTED_TEXT,
            RegionOutcome::Failed => "",
        }
    }
}

/// Recognize one region, waiting on the shared limiter before every attempt.
pub fn recognize_with_retry(
    recognizer: &dyn RegionRecognizer,
    limiter: &RateLimiter,
    policy: &RetryPolicy,
    image: &DynamicImage,
    kind: RegionKind,
    region_id: &str,
) -> RegionOutcome {
    for attempt in 0..policy.max_attempts {
        limiter.acquire();
        match recognizer.recognize(image, kind) {
            Ok(text) => return RegionOutcome::Recognized(text),
            Err(RecognitionError::ContentPolicy(detail)) => {
                tracing::error!(region_id, detail = %detail, "Region blocked by content inspection");
                return RegionOutcome::Blocked;
            }
            Err(e) if e.is_transient() => {
                if attempt + 1 >= policy.max_attempts {
                    tracing::error!(
                        region_id,
                        attempts = policy.max_attempts,
                        error = %e,
                        "Retries exhausted, skipping region"
                    );
                    return RegionOutcome::Exhausted;
                }
                let wait = policy.delay_for(attempt);
                tracing::warn!(
                    region_id,
                    attempt = attempt + 1,
                    wait_ms = wait.as_millis() as u64,
                    error = %e,
                    "Recognition failed, retrying"
                );
                std::thread::sleep(wait);
            }
            Err(e) => {
                tracing::error!(region_id, error = %e, "Recognition failed (not retryable)");
                return RegionOutcome::Failed;
            }
        }
    }
    RegionOutcome::Exhausted
}
