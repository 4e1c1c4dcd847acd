//! Rolling one-hour window of rebalance timestamps.

use crate::domain::TimeMs;
use std::collections::VecDeque;

/// Hard cap on remembered timestamps.
pub const WINDOW_CAPACITY: usize = 200;
/// Entries older than this are pruned.
pub const WINDOW_SECS: i64 = 3600;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RebalanceWindow {
    timestamps: VecDeque<TimeMs>,
}

impl RebalanceWindow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a rebalance, evicting the oldest entry at capacity.
    pub fn record(&mut self, ts: TimeMs) {
        if self.timestamps.len() >= WINDOW_CAPACITY {
            self.timestamps.pop_front();
        }
        self.timestamps.push_back(ts);
    }

    /// Drop entries more than an hour older than `now`.
    pub fn prune(&mut self, now: TimeMs) {
        while let Some(front) = self.timestamps.front() {
            if now.millis_since(*front) > WINDOW_SECS * 1000 {
                self.timestamps.pop_front();
            } else {
                break;
            }
        }
    }

    /// Count of entries that survive a prune at `now`, without mutating.
    pub fn count_within(&self, now: TimeMs) -> usize {
        self.timestamps
            .iter()
            .filter(|ts| now.millis_since(**ts) <= WINDOW_SECS * 1000)
            .count()
    }

    /// A cap of zero disables the limiter.
    pub fn permits(&self, now: TimeMs, max_per_hour: u32) -> bool {
        if max_per_hour == 0 {
            return true;
        }
        self.count_within(now) < max_per_hour as usize
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }
}
