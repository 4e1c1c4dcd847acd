//! Swap command construction shared by the inventory and liquidation planners.

use crate::config::ControllerConfig;
use crate::domain::{command_id, Command, Decimal, SwapCommand, SwapPurpose, TimeMs, TradeSide};

/// Whether another attempt is allowed. A zero cap means unlimited.
pub fn attempts_remain(max_attempts: u32, used: u32) -> bool {
    max_attempts == 0 || used < max_attempts
}

/// Build a router swap in reference order. `amount` is already buffered.
pub fn swap_command(
    config: &ControllerConfig,
    side: TradeSide,
    amount: Decimal,
    amount_is_quote: bool,
    purpose: SwapPurpose,
    now: TimeMs,
) -> Command {
    let id = command_id("swap", &config.id, now, &[amount]);
    let pool_address = if config.pool_address.trim().is_empty() {
        None
    } else {
        Some(config.pool_address.clone())
    };
    Command::SubmitSwap(SwapCommand {
        id,
        connector: config.router_connector.clone(),
        trading_pair: config.trading_pair.clone(),
        side,
        amount,
        amount_is_quote,
        slippage_pct: config.swap_slippage_pct,
        pool_address,
        timeout_sec: config.swap_timeout_sec,
        poll_interval_sec: config.swap_poll_interval_sec,
        max_retries: config.swap_retry_attempts,
        retry_delay_sec: config.swap_retry_delay_sec,
        purpose,
        budget_key: config.budget_key().to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> Decimal {
        Decimal::from_str_canonical(s).unwrap()
    }

    #[test]
    fn test_attempt_cap() {
        assert!(attempts_remain(0, 100));
        assert!(attempts_remain(3, 2));
        assert!(!attempts_remain(3, 3));
    }

    #[test]
    fn test_swap_command_fields() {
        let config: ControllerConfig = serde_json::from_value(serde_json::json!({
            "id": "c", "connector_name": "clmm", "router_connector": "router",
            "trading_pair": "SOL-USDC", "pool_address": "p", "position_value_quote": 1000,
            "budget_key": "shared"
        }))
        .unwrap();
        let command = swap_command(
            &config,
            TradeSide::Sell,
            d("1.5"),
            false,
            SwapPurpose::Liquidation,
            TimeMs::from_secs(1),
        );
        let Command::SubmitSwap(swap) = command else {
            panic!("expected swap");
        };
        assert!(swap.id.starts_with("swap:"));
        assert_eq!(swap.connector, "router");
        assert_eq!(swap.trading_pair, "SOL-USDC");
        assert_eq!(swap.pool_address.as_deref(), Some("p"));
        assert_eq!(swap.budget_key, "shared");
        assert_eq!(swap.purpose, SwapPurpose::Liquidation);
    }
}
