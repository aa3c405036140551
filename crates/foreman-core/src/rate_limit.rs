//! Sliding-window rate limiting per named service.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Limits each named service to `max_calls` within a sliding `window`.
///
/// A rejected call consumes no slot; callers may try again once earlier
/// calls age out of the window.
#[derive(Debug)]
pub struct SlidingWindowLimiter {
    max_calls: usize,
    window: Duration,
    calls: Mutex<HashMap<String, Vec<Instant>>>,
}

impl SlidingWindowLimiter {
    pub fn new(max_calls: usize, window: Duration) -> Self {
        Self {
            max_calls,
            window,
            calls: Mutex::new(HashMap::new()),
        }
    }

    /// Try to reserve a slot for `service`. Returns false when the quota
    /// for the current window is exhausted.
    pub fn try_acquire(&self, service: &str) -> bool {
        let now = Instant::now();
        let mut calls = self.calls.lock().unwrap();
        let entry = calls.entry(service.to_string()).or_default();
        entry.retain(|at| now.duration_since(*at) < self.window);
        if entry.len() >= self.max_calls {
            return false;
        }
        entry.push(now);
        true
    }
}
