//! Bounded retry with a fixed interval.
//!
//! Every wait-for-external-state loop in the installer (partition nodes
//! appearing after a table rewrite, the pool event helper settling) goes
//! through this single helper so tests can inject instant-success or
//! instant-timeout policies.

use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub interval: Duration,
    pub timeout: Duration,
}

impl RetryPolicy {
    pub const fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }

    /// Default for partition device-node appearance.
    pub const fn device_nodes() -> Self {
        Self::new(Duration::from_millis(200), Duration::from_secs(10))
    }

    /// Default for the pool event helper populating its mount cache.
    pub const fn event_helper() -> Self {
        Self::new(Duration::from_millis(500), Duration::from_secs(30))
    }

    /// Zero-timeout policy: the predicate is checked exactly once.
    pub const fn immediate() -> Self {
        Self::new(Duration::from_millis(1), Duration::ZERO)
    }
}

/// Polls `predicate` until it returns true or the policy's timeout elapses.
/// The predicate is always checked at least once, before any sleep.
pub fn wait_for(policy: &RetryPolicy, mut predicate: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    loop {
        if predicate() {
            return true;
        }
        if start.elapsed() >= policy.timeout {
            return false;
        }
        std::thread::sleep(policy.interval);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wait_for_returns_immediately_on_success() {
        let policy = RetryPolicy::immediate();
        assert!(wait_for(&policy, || true));
    }

    #[test]
    fn wait_for_times_out_without_success() {
        let policy = RetryPolicy::new(Duration::from_millis(1), Duration::from_millis(5));
        let mut calls = 0;
        assert!(!wait_for(&policy, || {
            calls += 1;
            false
        }));
        assert!(calls >= 1);
    }

    #[test]
    fn wait_for_observes_late_success() {
        let policy = RetryPolicy::new(Duration::from_millis(1), Duration::from_millis(200));
        let mut calls = 0;
        assert!(wait_for(&policy, || {
            calls += 1;
            calls >= 3
        }));
        assert_eq!(calls, 3);
    }
}
