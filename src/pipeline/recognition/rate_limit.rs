use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Process-wide minimum spacing between outgoing requests.
///
/// A single "last dispatch" timestamp behind one mutex. The lock is held
/// across the wait, so callers are released one at a time and any two
/// consecutive dispatches are at least `interval` apart.
pub struct RateLimiter {
    interval: Duration,
    last: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: Mutex::new(None),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Block until a request may be sent; returns the dispatch instant.
    pub fn acquire(&self) -> Instant {
        let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(prev) = *last {
            let ready_at = prev + self.interval;
            let now = Instant::now();
            if ready_at > now {
                std::thread::sleep(ready_at - now);
            }
        }
        let now = Instant::now();
        *last = Some(now);
        now
    }
}
