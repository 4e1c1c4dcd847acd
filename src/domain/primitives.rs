//! Domain primitives: TimeMs, TokenPair, TradeSide.

use super::Decimal;
use serde::{Deserialize, Serialize};

/// Time in milliseconds since Unix epoch.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct TimeMs(pub i64);

impl TimeMs {
    /// Create a TimeMs from milliseconds.
    pub fn new(ms: i64) -> Self {
        TimeMs(ms)
    }

    /// Create a TimeMs from whole seconds.
    pub fn from_secs(secs: i64) -> Self {
        TimeMs(secs.saturating_mul(1000))
    }

    /// Current wall-clock time.
    pub fn now() -> Self {
        TimeMs(chrono::Utc::now().timestamp_millis())
    }

    /// Get the underlying milliseconds value.
    pub fn as_ms(&self) -> i64 {
        self.0
    }

    /// This time shifted forward by `secs` seconds.
    pub fn plus_secs(&self, secs: i64) -> Self {
        TimeMs(self.0.saturating_add(secs.saturating_mul(1000)))
    }

    /// Milliseconds elapsed since `earlier` (negative if `earlier` is in the future).
    pub fn millis_since(&self, earlier: TimeMs) -> i64 {
        self.0.saturating_sub(earlier.0)
    }

    /// Seconds elapsed since `earlier`, as an exact decimal.
    pub fn secs_since(&self, earlier: TimeMs) -> Decimal {
        Decimal::from_i64(self.millis_since(earlier)) / Decimal::from_i64(1000)
    }

    /// True once at least `secs` seconds have passed since `earlier`.
    pub fn has_elapsed(&self, earlier: TimeMs, secs: i64) -> bool {
        self.millis_since(earlier) >= secs.saturating_mul(1000)
    }
}

impl std::fmt::Display for TimeMs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A `BASE-QUOTE` trading pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TokenPair {
    pub base: String,
    pub quote: String,
}

impl TokenPair {
    pub fn new(base: impl Into<String>, quote: impl Into<String>) -> Self {
        TokenPair {
            base: base.into(),
            quote: quote.into(),
        }
    }

    /// Parse `"SOL-USDC"`. Returns `None` unless both halves are non-empty.
    pub fn parse(pair: &str) -> Option<Self> {
        let (base, quote) = pair.trim().split_once('-')?;
        let (base, quote) = (base.trim(), quote.trim());
        if base.is_empty() || quote.is_empty() || quote.contains('-') {
            return None;
        }
        Some(TokenPair::new(base, quote))
    }

    /// The same pair with base and quote swapped.
    pub fn reversed(&self) -> Self {
        TokenPair::new(self.quote.clone(), self.base.clone())
    }

    /// Same two tokens, in either order.
    pub fn same_tokens(&self, other: &TokenPair) -> bool {
        self == other || *self == other.reversed()
    }
}

impl std::fmt::Display for TokenPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.base, self.quote)
    }
}

/// Swap direction relative to the base token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeSide {
    /// Spend quote, receive base.
    Buy,
    /// Spend base, receive quote.
    Sell,
}

impl std::fmt::Display for TradeSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TradeSide::Buy => write!(f, "buy"),
            TradeSide::Sell => write!(f, "sell"),
        }
    }
}
