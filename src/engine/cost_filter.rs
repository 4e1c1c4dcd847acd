//! Cost-benefit gate for rebalances.
//!
//! Expected fee income over a fixed in-range horizon must cover the estimated
//! rebalance cost with a safety margin, and the payback time must stay under the
//! configured maximum.

use crate::config::ControllerConfig;
use crate::domain::{Decimal, DecisionLog, LogTopic, TimeMs};
use std::fmt;

/// Assumed time in range after a rebalance.
pub const IN_RANGE_HORIZON_SECS: i64 = 3600;
/// Expected fees must be at least this multiple of the cost.
pub const SAFETY_FACTOR: i64 = 2;
/// Dwell multiple after which the filter is bypassed.
pub const FORCE_MULTIPLIER: i64 = 10;
pub const FORCE_MIN_SECS: i64 = 600;

fn swap_notional_fraction() -> Decimal {
    Decimal::new(rust_decimal::Decimal::new(5, 1))
}

/// Added on top of configured slippage, in percent.
fn swap_fee_buffer_pct() -> Decimal {
    Decimal::new(rust_decimal::Decimal::new(3, 1))
}

fn fee_rate_floor() -> Decimal {
    Decimal::new(rust_decimal::Decimal::new(1, 9))
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CostFilterInput {
    pub enabled: bool,
    pub price: Decimal,
    pub position_value: Decimal,
    /// Quote per second.
    pub fee_rate_ewma: Option<Decimal>,
    pub bootstrap_quote_per_hour: Decimal,
    pub auto_swap_enabled: bool,
    pub swap_slippage_pct: Decimal,
    pub fixed_cost_quote: Decimal,
    pub max_payback_sec: i64,
}

impl CostFilterInput {
    pub fn from_config(
        config: &ControllerConfig,
        price: Decimal,
        position_value: Decimal,
        fee_rate_ewma: Option<Decimal>,
    ) -> Self {
        CostFilterInput {
            enabled: config.cost_filter_enabled,
            price,
            position_value,
            fee_rate_ewma,
            bootstrap_quote_per_hour: config.cost_filter_fee_rate_bootstrap_quote_per_hour,
            auto_swap_enabled: config.auto_swap_enabled,
            swap_slippage_pct: config.swap_slippage_pct,
            fixed_cost_quote: config.cost_filter_fixed_cost_quote,
            max_payback_sec: config.cost_filter_max_payback_sec,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeeRateSource {
    Ewma,
    Bootstrap,
    Zero,
}

impl FeeRateSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeeRateSource::Ewma => "ewma",
            FeeRateSource::Bootstrap => "bootstrap",
            FeeRateSource::Zero => "zero",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CostFilterOutcome {
    Disabled,
    InvalidPrice,
    ZeroCost,
    FeeRateZero,
    ExpectedFeeBelowThreshold,
    PaybackExceeded,
    Approved,
    /// Denied by the numbers but allowed by the dwell safety valve.
    Forced,
}

impl CostFilterOutcome {
    pub fn allows(&self) -> bool {
        matches!(
            self,
            CostFilterOutcome::Disabled
                | CostFilterOutcome::ZeroCost
                | CostFilterOutcome::Approved
                | CostFilterOutcome::Forced
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CostFilterOutcome::Disabled => "disabled",
            CostFilterOutcome::InvalidPrice => "invalid_price",
            CostFilterOutcome::ZeroCost => "zero_cost",
            CostFilterOutcome::FeeRateZero => "fee_rate_zero",
            CostFilterOutcome::ExpectedFeeBelowThreshold => "expected_fee_below_threshold",
            CostFilterOutcome::PaybackExceeded => "payback_exceeded",
            CostFilterOutcome::Approved => "approved",
            CostFilterOutcome::Forced => "forced",
        }
    }
}

impl fmt::Display for CostFilterOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one evaluation, with the figures that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct CostFilterVerdict {
    pub outcome: CostFilterOutcome,
    pub fee_rate: Decimal,
    pub fee_rate_source: FeeRateSource,
    pub expected_fees: Decimal,
    pub cost: Decimal,
    pub payback_sec: Option<Decimal>,
}

impl CostFilterVerdict {
    fn bare(outcome: CostFilterOutcome) -> Self {
        CostFilterVerdict {
            outcome,
            fee_rate: Decimal::zero(),
            fee_rate_source: FeeRateSource::Zero,
            expected_fees: Decimal::zero(),
            cost: Decimal::zero(),
            payback_sec: None,
        }
    }

    pub fn allows(&self) -> bool {
        self.outcome.allows()
    }

    /// Mark a denial as overridden by the safety valve.
    pub fn forced(mut self) -> Self {
        self.outcome = CostFilterOutcome::Forced;
        self
    }

    pub fn to_log(&self, position_id: &str) -> DecisionLog {
        let mut log = DecisionLog::new(LogTopic::CostFilter, self.outcome.as_str())
            .with("position", position_id)
            .with("fee_rate", self.fee_rate)
            .with("fee_rate_source", self.fee_rate_source.as_str())
            .with("expected_fees", self.expected_fees)
            .with("cost", self.cost);
        if let Some(payback) = self.payback_sec {
            log = log.with("payback_sec", payback);
        }
        log
    }
}

pub fn evaluate(input: &CostFilterInput) -> CostFilterVerdict {
    if !input.enabled {
        return CostFilterVerdict::bare(CostFilterOutcome::Disabled);
    }
    if !input.price.is_positive() {
        return CostFilterVerdict::bare(CostFilterOutcome::InvalidPrice);
    }

    let (fee_rate, fee_rate_source) = match input.fee_rate_ewma {
        Some(rate) if rate.is_positive() => (rate, FeeRateSource::Ewma),
        _ => {
            let rate = input.bootstrap_quote_per_hour / Decimal::from_i64(3600);
            if rate.is_positive() {
                (rate, FeeRateSource::Bootstrap)
            } else {
                (rate, FeeRateSource::Zero)
            }
        }
    };

    let expected_fees = fee_rate * Decimal::from_i64(IN_RANGE_HORIZON_SECS);
    let swap_notional = if input.auto_swap_enabled {
        input.position_value * swap_notional_fraction()
    } else {
        Decimal::zero()
    };
    let swap_fee_pct = (input.swap_slippage_pct + swap_fee_buffer_pct()).non_negative();
    let cost = input.fixed_cost_quote.non_negative() + swap_notional * swap_fee_pct.percent_to_fraction();

    let mut verdict = CostFilterVerdict {
        outcome: CostFilterOutcome::Approved,
        fee_rate,
        fee_rate_source,
        expected_fees,
        cost,
        payback_sec: None,
    };

    if !cost.is_positive() {
        verdict.outcome = CostFilterOutcome::ZeroCost;
        return verdict;
    }
    if expected_fees < cost * Decimal::from_i64(SAFETY_FACTOR) {
        verdict.outcome = if fee_rate.is_positive() {
            CostFilterOutcome::ExpectedFeeBelowThreshold
        } else {
            CostFilterOutcome::FeeRateZero
        };
        return verdict;
    }

    let payback = cost / fee_rate.max(fee_rate_floor());
    verdict.payback_sec = Some(payback);
    if payback > Decimal::from_i64(input.max_payback_sec) {
        verdict.outcome = CostFilterOutcome::PaybackExceeded;
    }
    verdict
}

/// True once the position has been out of range long enough to bypass the filter.
pub fn should_force(now: TimeMs, out_of_range_since: TimeMs, rebalance_seconds: i64) -> bool {
    if rebalance_seconds <= 0 {
        return false;
    }
    let threshold = rebalance_seconds
        .saturating_mul(FORCE_MULTIPLIER)
        .max(FORCE_MIN_SECS);
    now.has_elapsed(out_of_range_since, threshold)
}
