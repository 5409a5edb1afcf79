//! In-memory rolling-window rate limiter for outbound calls

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Allows at most `max_calls` acquisitions in any `window`-long span.
///
/// Purely process-local; no coordination with other processes.
#[derive(Debug)]
pub struct RollingWindowLimiter {
    max_calls: usize,
    window: Duration,
    calls: Mutex<VecDeque<Instant>>,
}

impl RollingWindowLimiter {
    /// A limiter of `max_calls` per `window`. A zero budget is raised to one.
    pub fn new(max_calls: usize, window: Duration) -> Self {
        Self {
            max_calls: max_calls.max(1),
            window,
            calls: Mutex::new(VecDeque::new()),
        }
    }

    pub fn per_minute(max_calls: usize) -> Self {
        Self::new(max_calls, Duration::from_secs(60))
    }

    /// Record a call at `now` if the budget allows it.
    pub fn try_acquire_at(&self, now: Instant) -> bool {
        let mut calls = self
            .calls
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        while let Some(&oldest) = calls.front() {
            if now.saturating_duration_since(oldest) >= self.window {
                calls.pop_front();
            } else {
                break;
            }
        }
        if calls.len() < self.max_calls {
            calls.push_back(now);
            true
        } else {
            false
        }
    }

    /// Calls remaining in the current window as of `now`.
    pub fn remaining_at(&self, now: Instant) -> usize {
        let calls = self
            .calls
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let in_window = calls
            .iter()
            .filter(|&&t| now.saturating_duration_since(t) < self.window)
            .count();
        self.max_calls.saturating_sub(in_window)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_budget_and_roll_off() {
        let limiter = RollingWindowLimiter::per_minute(2);
        let t0 = Instant::now();

        assert!(limiter.try_acquire_at(t0));
        assert!(limiter.try_acquire_at(t0 + Duration::from_secs(10)));
        assert!(!limiter.try_acquire_at(t0 + Duration::from_secs(20)));
        assert_eq!(limiter.remaining_at(t0 + Duration::from_secs(20)), 0);

        // First call leaves the window at t0 + 60s
        assert!(limiter.try_acquire_at(t0 + Duration::from_secs(60)));
        assert!(!limiter.try_acquire_at(t0 + Duration::from_secs(61)));
        assert!(limiter.try_acquire_at(t0 + Duration::from_secs(70)));
    }

    #[test]
    fn test_zero_budget_still_allows_one() {
        let limiter = RollingWindowLimiter::per_minute(0);
        let t0 = Instant::now();
        assert!(limiter.try_acquire_at(t0));
        assert!(!limiter.try_acquire_at(t0));
    }
}
