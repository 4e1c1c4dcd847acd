use crate::domain::{Decimal, TokenPair};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Env var holding the config JSON inline.
pub const CONFIG_JSON_ENV: &str = "CLMM_CONTROLLER_CONFIG_JSON";
/// Env var holding a path to the config JSON file.
pub const CONFIG_PATH_ENV: &str = "CLMM_CONTROLLER_CONFIG";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LiquidationMode {
    /// Keep whatever the closed position returned.
    None,
    /// Sell base back to quote after a stop-loss.
    Quote,
}

/// Settings for one guarded LP controller.
///
/// Percent fields (`2` = 2%): `position_width_pct`, `hysteresis_pct`,
/// `swap_safety_buffer_pct`, `swap_slippage_pct`.
/// Fraction fields (`0.05` = 5%): `target_base_value_pct`, `swap_min_value_pct`,
/// `stop_loss_pnl_pct`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerConfig {
    pub id: String,
    pub connector_name: String,
    pub router_connector: String,
    pub trading_pair: String,
    #[serde(default)]
    pub pool_trading_pair: Option<String>,
    pub pool_address: String,

    /// Zero disables the entry trigger.
    #[serde(default)]
    pub target_price: Decimal,
    #[serde(default = "default_true")]
    pub trigger_above: bool,

    pub position_value_quote: Decimal,
    #[serde(default = "default_target_base_value_pct")]
    pub target_base_value_pct: Decimal,
    #[serde(default = "default_position_width_pct")]
    pub position_width_pct: Decimal,

    #[serde(default = "default_rebalance_seconds")]
    pub rebalance_seconds: i64,
    #[serde(default = "default_hysteresis_pct")]
    pub hysteresis_pct: Decimal,
    #[serde(default = "default_cooldown_seconds")]
    pub cooldown_seconds: i64,
    #[serde(default = "default_max_rebalances_per_hour")]
    pub max_rebalances_per_hour: u32,
    #[serde(default = "default_reopen_delay_sec")]
    pub reopen_delay_sec: i64,

    #[serde(default = "default_true")]
    pub auto_swap_enabled: bool,
    #[serde(default = "default_swap_min_value_pct")]
    pub swap_min_value_pct: Decimal,
    #[serde(default = "default_swap_safety_buffer_pct")]
    pub swap_safety_buffer_pct: Decimal,
    #[serde(default = "default_swap_slippage_pct")]
    pub swap_slippage_pct: Decimal,
    #[serde(default = "default_swap_timeout_sec")]
    pub swap_timeout_sec: i64,
    #[serde(default = "default_swap_poll_interval_sec")]
    pub swap_poll_interval_sec: Decimal,
    #[serde(default)]
    pub swap_retry_attempts: u32,
    #[serde(default = "default_swap_retry_delay_sec")]
    pub swap_retry_delay_sec: Decimal,
    /// Zero means unlimited.
    #[serde(default = "default_max_inventory_swap_attempts")]
    pub max_inventory_swap_attempts: u32,

    #[serde(default)]
    pub cost_filter_enabled: bool,
    #[serde(default)]
    pub cost_filter_fee_rate_bootstrap_quote_per_hour: Decimal,
    #[serde(default)]
    pub cost_filter_fixed_cost_quote: Decimal,
    #[serde(default = "default_cost_filter_max_payback_sec")]
    pub cost_filter_max_payback_sec: i64,

    /// Zero disables the stop-loss.
    #[serde(default)]
    pub stop_loss_pnl_pct: Decimal,
    #[serde(default = "default_stop_loss_pause_sec")]
    pub stop_loss_pause_sec: i64,
    #[serde(default = "default_liquidation_mode")]
    pub stop_loss_liquidation_mode: LiquidationMode,
    /// Zero means unlimited.
    #[serde(default = "default_max_stoploss_liquidation_attempts")]
    pub max_stoploss_liquidation_attempts: u32,
    #[serde(default = "default_true")]
    pub reenter_enabled: bool,

    #[serde(default)]
    pub budget_key: Option<String>,
    #[serde(default)]
    pub native_token_symbol: Option<String>,
    #[serde(default)]
    pub min_native_balance: Decimal,
    #[serde(default = "default_balance_refresh_interval_sec")]
    pub balance_refresh_interval_sec: i64,
    /// A requested balance sync still pending after this blocks the controller.
    #[serde(default = "default_balance_refresh_timeout_sec")]
    pub balance_refresh_timeout_sec: i64,
    #[serde(default = "default_log_throttle_sec")]
    pub log_throttle_sec: i64,

    #[serde(default)]
    pub manual_kill_switch: bool,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnv(String),
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

fn dec(num: i64, scale: u32) -> Decimal {
    Decimal::new(rust_decimal::Decimal::new(num, scale))
}

fn default_true() -> bool {
    true
}
fn default_target_base_value_pct() -> Decimal {
    dec(5, 1)
}
fn default_position_width_pct() -> Decimal {
    dec(12, 0)
}
fn default_rebalance_seconds() -> i64 {
    60
}
fn default_hysteresis_pct() -> Decimal {
    dec(2, 1)
}
fn default_cooldown_seconds() -> i64 {
    30
}
fn default_max_rebalances_per_hour() -> u32 {
    20
}
fn default_reopen_delay_sec() -> i64 {
    5
}
fn default_swap_min_value_pct() -> Decimal {
    dec(5, 3)
}
fn default_swap_safety_buffer_pct() -> Decimal {
    dec(2, 0)
}
fn default_swap_slippage_pct() -> Decimal {
    dec(1, 0)
}
fn default_swap_timeout_sec() -> i64 {
    120
}
fn default_swap_poll_interval_sec() -> Decimal {
    dec(2, 0)
}
fn default_swap_retry_delay_sec() -> Decimal {
    dec(1, 0)
}
fn default_max_inventory_swap_attempts() -> u32 {
    3
}
fn default_max_stoploss_liquidation_attempts() -> u32 {
    5
}
fn default_cost_filter_max_payback_sec() -> i64 {
    3600
}
fn default_stop_loss_pause_sec() -> i64 {
    1800
}
fn default_liquidation_mode() -> LiquidationMode {
    LiquidationMode::Quote
}
fn default_balance_refresh_interval_sec() -> i64 {
    20
}
fn default_balance_refresh_timeout_sec() -> i64 {
    30
}
fn default_log_throttle_sec() -> i64 {
    60
}

impl ControllerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_map(std::env::vars().collect())
    }

    /// Inline JSON takes precedence over a file path.
    pub fn from_env_map(env_map: HashMap<String, String>) -> Result<Self, ConfigError> {
        if let Some(json) = env_map.get(CONFIG_JSON_ENV) {
            return Self::from_json_str(json)
                .map_err(|e| ConfigError::InvalidValue(CONFIG_JSON_ENV.to_string(), e.to_string()));
        }
        let path = env_map
            .get(CONFIG_PATH_ENV)
            .ok_or_else(|| ConfigError::MissingEnv(CONFIG_PATH_ENV.to_string()))?;
        let content = std::fs::read_to_string(path).map_err(|_| {
            ConfigError::InvalidValue(
                CONFIG_PATH_ENV.to_string(),
                "file not found or unreadable".to_string(),
            )
        })?;
        Self::from_json_str(&content)
            .map_err(|e| ConfigError::InvalidValue(CONFIG_PATH_ENV.to_string(), e.to_string()))
    }

    /// Parse and validate.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: ControllerConfig = serde_json::from_str(json)
            .map_err(|e| ConfigError::InvalidValue("config".to_string(), e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let reference = self.reference_pair()?;
        let pool = self.pool_pair()?;
        if !reference.same_tokens(&pool) {
            return Err(invalid(
                "pool_trading_pair",
                format!("{} does not match trading_pair {}", pool, reference),
            ));
        }
        if self.id.trim().is_empty() {
            return Err(invalid("id", "must not be empty"));
        }
        if !self.position_width_pct.is_positive() || self.position_width_pct >= Decimal::hundred() {
            return Err(invalid("position_width_pct", "must be within (0, 100)"));
        }
        if self.target_base_value_pct.is_negative() || self.target_base_value_pct > Decimal::one()
        {
            return Err(invalid("target_base_value_pct", "must be within [0, 1]"));
        }
        if self.stop_loss_pnl_pct.is_negative() || self.stop_loss_pnl_pct >= Decimal::one() {
            return Err(invalid("stop_loss_pnl_pct", "must be within [0, 1)"));
        }
        for (name, value) in [
            ("hysteresis_pct", self.hysteresis_pct),
            ("swap_min_value_pct", self.swap_min_value_pct),
            ("swap_safety_buffer_pct", self.swap_safety_buffer_pct),
            ("swap_slippage_pct", self.swap_slippage_pct),
            ("position_value_quote", self.position_value_quote),
            ("min_native_balance", self.min_native_balance),
        ] {
            if value.is_negative() {
                return Err(invalid(name, "must not be negative"));
            }
        }
        if self.swap_safety_buffer_pct >= Decimal::hundred() {
            return Err(invalid("swap_safety_buffer_pct", "must be < 100"));
        }
        if self.balance_refresh_interval_sec <= 0 {
            return Err(invalid("balance_refresh_interval_sec", "must be > 0"));
        }
        if self.balance_refresh_timeout_sec <= 0 {
            return Err(invalid("balance_refresh_timeout_sec", "must be > 0"));
        }
        Ok(())
    }

    pub fn reference_pair(&self) -> Result<TokenPair, ConfigError> {
        TokenPair::parse(&self.trading_pair)
            .ok_or_else(|| invalid("trading_pair", "expected BASE-QUOTE"))
    }

    /// Falls back to the reference pair when no pool pair is configured.
    pub fn pool_pair(&self) -> Result<TokenPair, ConfigError> {
        match &self.pool_trading_pair {
            Some(pair) => {
                TokenPair::parse(pair).ok_or_else(|| invalid("pool_trading_pair", "expected BASE-QUOTE"))
            }
            None => self.reference_pair(),
        }
    }

    /// Budget key shared with other controllers, or the controller id.
    pub fn budget_key(&self) -> &str {
        self.budget_key.as_deref().unwrap_or(&self.id)
    }

    pub fn stop_loss_enabled(&self) -> bool {
        self.stop_loss_pnl_pct.is_positive()
    }

    /// Minimum quote value worth swapping.
    pub fn min_swap_value(&self) -> Decimal {
        self.position_value_quote * self.swap_min_value_pct.non_negative()
    }

    /// `amount * (1 - buffer/100)`.
    pub fn apply_swap_buffer(&self, amount: Decimal) -> Decimal {
        let buffer = self.swap_safety_buffer_pct.non_negative();
        if buffer.is_zero() {
            return amount;
        }
        amount * (Decimal::one() - buffer.percent_to_fraction())
    }

    /// Pool price older than this is ignored in favour of the router price.
    pub fn pool_price_max_age_sec(&self) -> i64 {
        (self.balance_refresh_interval_sec * 3).max(30)
    }
}

fn invalid(field: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue(field.to_string(), message.into())
}
