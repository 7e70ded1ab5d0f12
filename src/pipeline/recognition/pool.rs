//! Bounded worker pool for region recognition.
//!
//! Workers pull jobs from a shared queue and send `(index, outcome)` back
//! over a channel; the calling thread collects results and drives the
//! progress callback. Results are keyed by job index, so completion order
//! never affects the merged document.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex, PoisonError};

use image::DynamicImage;

use super::rate_limit::RateLimiter;
use super::retry::{recognize_with_retry, RegionOutcome, RetryPolicy};
use super::RegionRecognizer;
use crate::pipeline::region::RegionKind;

/// One region awaiting recognition.
pub struct RegionJob {
    /// Slot in the result vector.
    pub index: usize,
    pub region_id: String,
    pub region_type: String,
    pub image: DynamicImage,
}

/// Completion notice: `(completed, total, region_id, region_type)`.
pub type ProgressFn<'a> = dyn FnMut(usize, usize, &str, &str) + 'a;

pub struct PoolRun {
    /// `None` for jobs that were never dispatched.
    pub outcomes: Vec<Option<RegionOutcome>>,
    /// Dispatch stopped early because shutdown was requested.
    pub cancelled: bool,
}

pub struct RecognitionPool {
    recognizer: Arc<dyn RegionRecognizer>,
    limiter: Arc<RateLimiter>,
    policy: RetryPolicy,
    concurrency: usize,
    shutdown: Arc<AtomicBool>,
}

impl RecognitionPool {
    pub fn new(
        recognizer: Arc<dyn RegionRecognizer>,
        limiter: Arc<RateLimiter>,
        policy: RetryPolicy,
        concurrency: usize,
    ) -> Self {
        Self {
            recognizer,
            limiter,
            policy,
            concurrency: concurrency.max(1),
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Share an externally owned shutdown flag (Ctrl-C handler).
    pub fn with_shutdown(mut self, shutdown: Arc<AtomicBool>) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Recognize every job. `slots` is the length of the result vector;
    /// each job's `index` must be below it.
    pub fn run(
        &self,
        jobs: Vec<RegionJob>,
        slots: usize,
        mut progress: Option<&mut ProgressFn<'_>>,
    ) -> PoolRun {
        let total = jobs.len();
        let mut outcomes: Vec<Option<RegionOutcome>> = vec![None; slots];
        if total == 0 {
            return PoolRun {
                outcomes,
                cancelled: false,
            };
        }

        let workers = self.concurrency.min(total);
        let queue = Mutex::new(VecDeque::from(jobs));
        let (tx, rx) = mpsc::channel::<(usize, String, String, RegionOutcome)>();
        let mut completed = 0usize;

        std::thread::scope(|s| {
            for _ in 0..workers {
                let tx = tx.clone();
                let queue = &queue;
                s.spawn(move || loop {
                    if self.shutdown.load(Ordering::Relaxed) {
                        break;
                    }
                    let job = queue
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .pop_front();
                    let Some(job) = job else { break };

                    let kind = RegionKind::from_label(&job.region_type);
                    let outcome = recognize_with_retry(
                        self.recognizer.as_ref(),
                        &self.limiter,
                        &self.policy,
                        &job.image,
                        kind,
                        &job.region_id,
                    );
                    if tx
                        .send((job.index, job.region_id, job.region_type, outcome))
                        .is_err()
                    {
                        break;
                    }
                });
            }
            drop(tx);

            for (index, region_id, region_type, outcome) in rx {
                completed += 1;
                if let Some(slot) = outcomes.get_mut(index) {
                    *slot = Some(outcome);
                }
                if let Some(cb) = progress.as_deref_mut() {
                    cb(completed, total, &region_id, &region_type);
                }
            }
        });

        let cancelled = completed < total && self.shutdown.load(Ordering::Relaxed);
        if cancelled {
            tracing::warn!(completed, total, "Recognition stopped by shutdown request");
        }
        PoolRun {
            outcomes,
            cancelled,
        }
    }
}
