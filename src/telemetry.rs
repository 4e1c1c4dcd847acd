//! Tracing setup and per-key log throttling.

use crate::domain::TimeMs;
use std::collections::HashMap;

/// Install a fmt subscriber filtered by `RUST_LOG`, falling back to `default_directive`.
///
/// Safe to call more than once; later calls are no-ops.
pub fn init_tracing(default_directive: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(default_directive))
        .unwrap_or_else(|_| {
            tracing_subscriber::EnvFilter::default()
                .add_directive(tracing_subscriber::filter::LevelFilter::INFO.into())
        });
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Allows one log line per key per interval.
#[derive(Debug, Clone)]
pub struct LogThrottle {
    interval_ms: i64,
    last: HashMap<String, TimeMs>,
}

impl LogThrottle {
    pub fn new(interval_sec: i64) -> Self {
        LogThrottle {
            interval_ms: interval_sec.max(0).saturating_mul(1000),
            last: HashMap::new(),
        }
    }

    /// True if `key` has not been allowed within the interval. Records `now` when true.
    pub fn allow(&mut self, key: &str, now: TimeMs) -> bool {
        self.allow_every(key, now, self.interval_ms / 1000)
    }

    /// As [`allow`](Self::allow) with a per-call interval.
    pub fn allow_every(&mut self, key: &str, now: TimeMs, interval_sec: i64) -> bool {
        if let Some(last) = self.last.get(key) {
            if !now.has_elapsed(*last, interval_sec) {
                return false;
            }
        }
        self.last.insert(key.to_string(), now);
        true
    }
}
