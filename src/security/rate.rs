//! Sliding-window action rate tracker.
//!
//! The only mutable state the policy engine carries at runtime; internally
//! thread-safe behind a mutex, same shape as the firewall-style limiter the
//! rest of the runtime uses.

use std::sync::Mutex;
use std::time::{Duration, Instant};

const WINDOW: Duration = Duration::from_secs(3600);

#[derive(Debug)]
pub struct RateTracker {
    max_per_hour: u32,
    events: Mutex<Vec<Instant>>,
}

impl RateTracker {
    pub fn new(max_per_hour: u32) -> Self {
        Self {
            max_per_hour,
            events: Mutex::new(Vec::new()),
        }
    }

    pub fn max_per_hour(&self) -> u32 {
        self.max_per_hour
    }

    /// Record one action if the window has room. Returns false when the
    /// per-hour budget is already spent.
    pub fn try_acquire(&self) -> bool {
        let now = Instant::now();
        let cutoff = now.checked_sub(WINDOW).unwrap_or(now);
        let mut events = self.events.lock().unwrap_or_else(|e| e.into_inner());
        events.retain(|t| *t > cutoff);
        if events.len() >= self.max_per_hour as usize {
            return false;
        }
        events.push(now);
        true
    }

    /// Actions left in the current window.
    pub fn remaining(&self) -> u32 {
        let now = Instant::now();
        let cutoff = now.checked_sub(WINDOW).unwrap_or(now);
        let events = self.events.lock().unwrap_or_else(|e| e.into_inner());
        let used = events.iter().filter(|t| **t > cutoff).count();
        (self.max_per_hour as usize).saturating_sub(used) as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_budget_enforced() {
        let tracker = RateTracker::new(3);
        assert!(tracker.try_acquire());
        assert!(tracker.try_acquire());
        assert!(tracker.try_acquire());
        assert!(!tracker.try_acquire());
        assert_eq!(tracker.remaining(), 0);
    }

    #[test]
    fn test_remaining_counts_down() {
        let tracker = RateTracker::new(5);
        assert_eq!(tracker.remaining(), 5);
        tracker.try_acquire();
        tracker.try_acquire();
        assert_eq!(tracker.remaining(), 3);
    }

    #[test]
    fn test_zero_budget_blocks_everything() {
        let tracker = RateTracker::new(0);
        assert!(!tracker.try_acquire());
    }
}
