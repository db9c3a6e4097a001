//! Sliding-window admission control
//!
//! A [`RateLimiter`] admits at most `max_calls` calls in any rolling window of
//! `window` length. Callers over the limit are delayed, never rejected.

use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

/// Rolling-window rate limiter shared by every caller of one executor
#[derive(Debug)]
pub struct RateLimiter {
    max_calls: usize,
    window: Duration,
    /// Admission times inside the current window, oldest first
    admitted: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    /// Creates a limiter admitting `max_calls` per `window`
    ///
    /// A limit of zero is treated as one call per window.
    pub fn new(max_calls: u32, window: Duration) -> Self {
        let max_calls = (max_calls as usize).max(1);
        Self {
            max_calls,
            window,
            admitted: Mutex::new(VecDeque::with_capacity(max_calls)),
        }
    }

    pub fn max_calls(&self) -> usize {
        self.max_calls
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Waits until one more call fits in the window, then records it
    pub async fn acquire(&self) {
        loop {
            let wait = match self.admit_or_wait() {
                None => return,
                Some(wait) => wait,
            };
            tracing::debug!(wait_ms = wait.as_millis() as u64, "rate limit reached, waiting");
            tokio::time::sleep(wait).await;
        }
    }

    /// Records a call if the window has room, without waiting
    pub fn try_acquire(&self) -> bool {
        self.admit_or_wait().is_none()
    }

    /// Number of calls admitted within the current window
    pub fn in_window(&self) -> usize {
        let mut admitted = self.admitted.lock();
        self.prune(&mut admitted, Instant::now());
        admitted.len()
    }

    /// Admits the call and returns `None`, or returns how long until the oldest
    /// admission leaves the window
    fn admit_or_wait(&self) -> Option<Duration> {
        let now = Instant::now();
        let mut admitted = self.admitted.lock();
        self.prune(&mut admitted, now);

        if admitted.len() < self.max_calls {
            admitted.push_back(now);
            return None;
        }

        let oldest = admitted.front().copied().unwrap_or(now);
        Some((oldest + self.window).saturating_duration_since(now))
    }

    fn prune(&self, admitted: &mut VecDeque<Instant>, now: Instant) {
        while let Some(&oldest) = admitted.front() {
            if now.duration_since(oldest) >= self.window {
                admitted.pop_front();
            } else {
                break;
            }
        }
    }
}
