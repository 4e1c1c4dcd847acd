//! Commands handed to the host's executors.
//!
//! Open commands carry pool-order values; the engine translates before emitting.

use super::{Decimal, LpSide, SwapPurpose, TimeMs, TradeSide};
use serde::Serialize;
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OpenPositionCommand {
    pub id: String,
    pub connector: String,
    pub pool_address: String,
    pub trading_pair: String,
    pub base_token: String,
    pub quote_token: String,
    pub lower_price: Decimal,
    pub upper_price: Decimal,
    pub base_amount: Decimal,
    pub quote_amount: Decimal,
    pub side: LpSide,
    pub reservation_id: String,
    pub budget_key: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StopCommand {
    pub target_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SwapCommand {
    pub id: String,
    pub connector: String,
    pub trading_pair: String,
    pub side: TradeSide,
    pub amount: Decimal,
    pub amount_is_quote: bool,
    pub slippage_pct: Decimal,
    pub pool_address: Option<String>,
    pub timeout_sec: i64,
    pub poll_interval_sec: Decimal,
    pub max_retries: u32,
    pub retry_delay_sec: Decimal,
    pub purpose: SwapPurpose,
    pub budget_key: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    OpenPosition(OpenPositionCommand),
    Stop(StopCommand),
    SubmitSwap(SwapCommand),
}

impl Command {
    pub fn stop(target_id: impl Into<String>) -> Self {
        Command::Stop(StopCommand {
            target_id: target_id.into(),
        })
    }

    /// Id of the executor this command creates. Stops create nothing.
    pub fn created_id(&self) -> Option<&str> {
        match self {
            Command::OpenPosition(c) => Some(&c.id),
            Command::SubmitSwap(c) => Some(&c.id),
            Command::Stop(_) => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Command::OpenPosition(_) => "open_position",
            Command::Stop(_) => "stop",
            Command::SubmitSwap(_) => "submit_swap",
        }
    }
}

/// Deterministic id for a created executor.
///
/// Format: `"{prefix}:{hex}"`, where hex is the first 16 bytes of
/// SHA-256(controller_id | prefix | now | amounts...).
pub fn command_id(prefix: &str, controller_id: &str, now: TimeMs, amounts: &[Decimal]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(controller_id.as_bytes());
    hasher.update(b"|");
    hasher.update(prefix.as_bytes());
    hasher.update(b"|");
    hasher.update(now.as_ms().to_string().as_bytes());
    for amount in amounts {
        hasher.update(b"|");
        hasher.update(amount.to_canonical_string().as_bytes());
    }
    let hash = hasher.finalize();
    format!("{}:{}", prefix, hex::encode(&hash[..16]))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> Decimal {
        Decimal::from_str_canonical(s).unwrap()
    }

    #[test]
    fn test_command_id_is_deterministic() {
        let a = command_id("lp", "ctrl", TimeMs::new(1000), &[d("1"), d("2")]);
        let b = command_id("lp", "ctrl", TimeMs::new(1000), &[d("1.0"), d("2.00")]);
        assert_eq!(a, b);
        assert!(a.starts_with("lp:"));
        assert_eq!(a.len(), "lp:".len() + 32);
    }

    #[test]
    fn test_command_id_differs_per_input() {
        let a = command_id("swap", "ctrl", TimeMs::new(1000), &[d("1")]);
        let b = command_id("swap", "ctrl", TimeMs::new(1001), &[d("1")]);
        let c = command_id("swap", "other", TimeMs::new(1000), &[d("1")]);
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_stop_has_no_created_id() {
        let stop = Command::stop("lp-1");
        assert_eq!(stop.created_id(), None);
        assert_eq!(stop.kind(), "stop");
        let json = serde_json::to_value(&stop).unwrap();
        assert_eq!(json["type"], "stop");
        assert_eq!(json["target_id"], "lp-1");
    }
}
