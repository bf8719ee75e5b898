//! Minimum-interval rate limiter owned by a provider instance.

use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

#[derive(Debug)]
pub struct RateLimiter {
    min_interval: Duration,
    last_call: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_call: Mutex::new(None),
        }
    }

    pub fn unlimited() -> Self {
        Self::new(Duration::ZERO)
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Block until a call is allowed, then record it. Returns the time waited.
    pub fn acquire(&self) -> Duration {
        let mut last = self.last_call.lock().unwrap_or_else(PoisonError::into_inner);
        let wait = last
            .map(|t| self.min_interval.saturating_sub(t.elapsed()))
            .unwrap_or(Duration::ZERO);
        if !wait.is_zero() {
            std::thread::sleep(wait);
        }
        *last = Some(Instant::now());
        wait
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::unlimited()
    }
}
