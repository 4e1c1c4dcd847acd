//! EWMA of quote-denominated fee accrual per position.

use crate::domain::{ControllerContext, Decimal, FeeEstimatorContext, LpState, Snapshot, TimeMs};

/// Smoothing factor.
pub fn ewma_alpha() -> Decimal {
    Decimal::new(rust_decimal::Decimal::new(1, 1))
}

/// Samples closer together than this are ignored.
pub const MIN_SAMPLE_SECS: i64 = 10;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FeeSample {
    /// New series started with this sample as baseline.
    Seeded,
    /// Too soon, or clock did not advance.
    Skipped,
    /// Fees dropped (claimed); baseline moved, rate untouched.
    Resynced,
    /// Rate updated to this value (quote per second).
    Updated(Decimal),
}

/// Feed one observation of pending fee value into the estimator.
pub fn sample(
    fee: &mut FeeEstimatorContext,
    position_address: &str,
    fee_value: Decimal,
    now: TimeMs,
) -> FeeSample {
    let (last_value, last_sample) = match (fee.last_value, fee.last_sample) {
        (Some(v), Some(t)) if fee.position_address.as_deref() == Some(position_address) => (v, t),
        _ => {
            *fee = FeeEstimatorContext {
                rate_ewma: None,
                last_value: Some(fee_value),
                last_sample: Some(now),
                position_address: Some(position_address.to_string()),
            };
            return FeeSample::Seeded;
        }
    };

    let elapsed_ms = now.millis_since(last_sample);
    if elapsed_ms <= 0 || elapsed_ms < MIN_SAMPLE_SECS * 1000 {
        return FeeSample::Skipped;
    }

    let delta = fee_value - last_value;
    fee.last_value = Some(fee_value);
    fee.last_sample = Some(now);
    if delta.is_negative() {
        return FeeSample::Resynced;
    }

    let rate = delta / now.secs_since(last_sample);
    let alpha = ewma_alpha();
    let ewma = match fee.rate_ewma {
        Some(prev) => prev * (Decimal::one() - alpha) + rate * alpha,
        None => rate,
    };
    fee.rate_ewma = Some(ewma);
    FeeSample::Updated(ewma)
}

/// Sample every in-range position with a known address.
pub fn update_fee_estimates(ctx: &mut ControllerContext, snapshot: &Snapshot) {
    let Some(price) = snapshot.valid_price() else {
        return;
    };
    for view in snapshot.active_lp() {
        if view.state != Some(LpState::InRange) {
            continue;
        }
        let Some(address) = view.position_address.as_deref() else {
            continue;
        };
        let Some(fee_value) = view.pending_fee_value(price) else {
            continue;
        };
        let lp = ctx.lp.entry(view.id.clone()).or_default();
        let outcome = sample(&mut lp.fee, address, fee_value, snapshot.now);
        if let FeeSample::Updated(rate) = outcome {
            tracing::debug!(position = %view.id, fee_rate = %rate, "fee rate updated");
        }
    }
}
