//! Persistent controller context and the sparse patch that mutates it.
//!
//! The engine reads `ControllerContext` and returns a `DecisionPatch`. Only
//! [`ControllerContext::apply`] writes, once per tick.

use super::{Decimal, Reason, TimeMs};
use crate::engine::rate_limiter::RebalanceWindow;
use std::collections::{BTreeMap, BTreeSet};

/// Frozen value-at-risk reference for one position.
#[derive(Debug, Clone, PartialEq)]
pub struct BudgetAnchor {
    /// Deployed value plus the wallet slice, in quote.
    pub value_quote: Decimal,
    pub deployed_quote: Decimal,
    pub wallet_base_amount: Decimal,
    pub wallet_quote_amount: Decimal,
    pub created_at: TimeMs,
}

impl BudgetAnchor {
    pub fn is_valid(&self) -> bool {
        self.value_quote.is_positive()
    }

    /// Position value plus the anchored wallet slice at `price`. `None` on overflow.
    pub fn equity(&self, position_value: Decimal, price: Decimal) -> Option<Decimal> {
        self.wallet_base_amount
            .checked_mul(price)?
            .checked_add(self.wallet_quote_amount)?
            .checked_add(position_value)
    }
}

/// EWMA state for one position's fee accrual rate.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeeEstimatorContext {
    /// Quote per second.
    pub rate_ewma: Option<Decimal>,
    pub last_value: Option<Decimal>,
    pub last_sample: Option<TimeMs>,
    pub position_address: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LpContext {
    pub anchor: Option<BudgetAnchor>,
    pub open_base: Option<Decimal>,
    pub open_quote: Option<Decimal>,
    /// Budget reservation that funded this position.
    pub reservation_id: Option<String>,
    pub fee: FeeEstimatorContext,
}

impl LpContext {
    pub fn valid_anchor(&self) -> Option<&BudgetAnchor> {
        self.anchor.as_ref().filter(|a| a.is_valid())
    }
}

/// Created when a position is stopped for rebalancing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RebalancePlan {
    pub created_at: TimeMs,
    pub reopen_after: TimeMs,
}

impl RebalancePlan {
    /// Negative delays are treated as zero.
    pub fn new(created_at: TimeMs, reopen_delay_sec: i64) -> Self {
        RebalancePlan {
            created_at,
            reopen_after: created_at.plus_secs(reopen_delay_sec.max(0)),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RebalanceContext {
    pub plans: BTreeMap<String, RebalancePlan>,
    pub out_of_range_since: BTreeMap<String, TimeMs>,
    pub window: RebalanceWindow,
    pub last_rebalance: Option<TimeMs>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SwapContext {
    pub settled: BTreeSet<String>,
    pub last_inventory_swap: Option<TimeMs>,
    /// Inventory swaps submitted since the last open.
    pub inventory_swap_attempts: u32,
    pub inventory_swap_failed: bool,
    pub awaiting_balance_refresh: bool,
    /// Set when the refresh flag was raised. A refresh must start after this.
    pub refresh_requested_at: Option<TimeMs>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StopLossContext {
    pub until: Option<TimeMs>,
    pub pending_liquidation: bool,
    pub liquidation_target_base: Option<Decimal>,
    pub last_liquidation_attempt: Option<TimeMs>,
    /// Liquidation swaps submitted since the last trigger.
    pub liquidation_attempts: u32,
    pub last_exit_reason: Option<Reason>,
}

impl StopLossContext {
    pub fn pause_active(&self, now: TimeMs) -> bool {
        self.until.map(|until| now < until).unwrap_or(false)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FailureContext {
    pub blocked: bool,
    pub reason: Option<Reason>,
    /// Executors whose failure already tripped the flag. Survives a reset.
    pub acknowledged: BTreeSet<String>,
}

/// Everything that persists between ticks for one controller.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ControllerContext {
    pub lp: BTreeMap<String, LpContext>,
    pub rebalance: RebalanceContext,
    pub swap: SwapContext,
    pub stoploss: StopLossContext,
    pub failure: FailureContext,
    /// Created executors not yet seen in the executor list, by submit time.
    pub inflight: BTreeMap<String, TimeMs>,
    /// LP executors whose close has already triggered a balance sync.
    pub closed_lp: BTreeSet<String>,
}

/// Sparse diff over [`ControllerContext`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecisionPatch {
    pub set_failure: Option<Reason>,
    pub acknowledge_failures: BTreeSet<String>,

    pub clear_all_plans: bool,
    pub clear_plans: BTreeSet<String>,
    pub add_plans: BTreeMap<String, RebalancePlan>,
    pub update_out_of_range_since: BTreeMap<String, TimeMs>,
    pub clear_out_of_range_since: BTreeSet<String>,
    pub record_rebalance: Option<TimeMs>,

    pub stoploss_until: Option<TimeMs>,
    pub last_exit_reason: Option<Reason>,
    pub pending_liquidation: Option<bool>,
    pub liquidation_target_base: Option<Decimal>,
    pub liquidation_attempt: Option<TimeMs>,
    pub liquidation_attempts: Option<u32>,
    pub reset_liquidation_attempt: bool,

    pub last_inventory_swap: Option<TimeMs>,
    pub inventory_swap_attempts: Option<u32>,
    pub inventory_swap_failed: Option<bool>,
    pub request_balance_refresh: Option<TimeMs>,
    pub clear_balance_refresh: bool,
    pub settle_swaps: BTreeSet<String>,

    pub open_amounts: BTreeMap<String, (Decimal, Decimal)>,
    pub reservations: BTreeMap<String, String>,
    pub settle_lps: BTreeSet<String>,
    pub record_inflight: BTreeMap<String, TimeMs>,
    pub resolve_inflight: BTreeSet<String>,
}

impl DecisionPatch {
    pub fn is_empty(&self) -> bool {
        *self == DecisionPatch::default()
    }

    /// Fold `other` into `self`. Scalar fields from `other` win when set.
    pub fn absorb(&mut self, other: DecisionPatch) {
        self.set_failure = other.set_failure.or(self.set_failure);
        self.acknowledge_failures.extend(other.acknowledge_failures);
        self.clear_all_plans |= other.clear_all_plans;
        self.clear_plans.extend(other.clear_plans);
        self.add_plans.extend(other.add_plans);
        self.update_out_of_range_since
            .extend(other.update_out_of_range_since);
        self.clear_out_of_range_since
            .extend(other.clear_out_of_range_since);
        self.record_rebalance = other.record_rebalance.or(self.record_rebalance);
        self.stoploss_until = other.stoploss_until.or(self.stoploss_until);
        self.last_exit_reason = other.last_exit_reason.or(self.last_exit_reason);
        self.pending_liquidation = other.pending_liquidation.or(self.pending_liquidation);
        self.liquidation_target_base = other
            .liquidation_target_base
            .or(self.liquidation_target_base);
        self.liquidation_attempt = other.liquidation_attempt.or(self.liquidation_attempt);
        self.liquidation_attempts = other.liquidation_attempts.or(self.liquidation_attempts);
        self.reset_liquidation_attempt |= other.reset_liquidation_attempt;
        self.last_inventory_swap = other.last_inventory_swap.or(self.last_inventory_swap);
        self.inventory_swap_attempts = other
            .inventory_swap_attempts
            .or(self.inventory_swap_attempts);
        self.inventory_swap_failed = other.inventory_swap_failed.or(self.inventory_swap_failed);
        self.request_balance_refresh = other
            .request_balance_refresh
            .or(self.request_balance_refresh);
        self.clear_balance_refresh |= other.clear_balance_refresh;
        self.settle_swaps.extend(other.settle_swaps);
        self.open_amounts.extend(other.open_amounts);
        self.reservations.extend(other.reservations);
        self.settle_lps.extend(other.settle_lps);
        self.record_inflight.extend(other.record_inflight);
        self.resolve_inflight.extend(other.resolve_inflight);
    }
}

impl ControllerContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Commit a patch. Plan clears run before plan adds; other clears run after their sets.
    pub fn apply(&mut self, patch: &DecisionPatch) {
        if let Some(reason) = patch.set_failure {
            self.failure.blocked = true;
            self.failure.reason = Some(reason);
        }
        self.failure
            .acknowledged
            .extend(patch.acknowledge_failures.iter().cloned());

        if patch.clear_all_plans {
            self.rebalance.plans.clear();
        }
        for id in &patch.clear_plans {
            self.rebalance.plans.remove(id);
        }
        for (id, plan) in &patch.add_plans {
            self.rebalance.plans.insert(id.clone(), *plan);
        }
        for (id, ts) in &patch.update_out_of_range_since {
            self.rebalance.out_of_range_since.insert(id.clone(), *ts);
        }
        for id in &patch.clear_out_of_range_since {
            self.rebalance.out_of_range_since.remove(id);
        }
        if let Some(ts) = patch.record_rebalance {
            self.rebalance.window.record(ts);
            self.rebalance.last_rebalance = Some(ts);
        }

        if let Some(until) = patch.stoploss_until {
            self.stoploss.until = Some(until);
        }
        if let Some(reason) = patch.last_exit_reason {
            self.stoploss.last_exit_reason = Some(reason);
        }
        if let Some(target) = patch.liquidation_target_base {
            self.stoploss.liquidation_target_base = Some(target);
        }
        if patch.reset_liquidation_attempt {
            self.stoploss.last_liquidation_attempt = None;
            self.stoploss.liquidation_attempts = 0;
        }
        if let Some(ts) = patch.liquidation_attempt {
            self.stoploss.last_liquidation_attempt = Some(ts);
        }
        if let Some(count) = patch.liquidation_attempts {
            self.stoploss.liquidation_attempts = count;
        }
        if let Some(pending) = patch.pending_liquidation {
            self.stoploss.pending_liquidation = pending;
            if !pending {
                self.stoploss.liquidation_target_base = None;
            }
        }

        if let Some(ts) = patch.last_inventory_swap {
            self.swap.last_inventory_swap = Some(ts);
        }
        if let Some(count) = patch.inventory_swap_attempts {
            self.swap.inventory_swap_attempts = count;
        }
        if let Some(failed) = patch.inventory_swap_failed {
            self.swap.inventory_swap_failed = failed;
        }
        if patch.clear_balance_refresh {
            self.swap.awaiting_balance_refresh = false;
            self.swap.refresh_requested_at = None;
        }
        if let Some(ts) = patch.request_balance_refresh {
            self.request_balance_refresh(ts);
        }
        self.swap.settled.extend(patch.settle_swaps.iter().cloned());

        for (id, (base, quote)) in &patch.open_amounts {
            let lp = self.lp.entry(id.clone()).or_default();
            lp.open_base = Some(*base);
            lp.open_quote = Some(*quote);
        }
        for (id, reservation) in &patch.reservations {
            self.lp.entry(id.clone()).or_default().reservation_id = Some(reservation.clone());
        }
        self.closed_lp.extend(patch.settle_lps.iter().cloned());
        for (id, ts) in &patch.record_inflight {
            self.inflight.insert(id.clone(), *ts);
        }
        for id in &patch.resolve_inflight {
            self.inflight.remove(id);
        }
    }

    /// External manual reset of the sticky failure flag.
    pub fn clear_failure(&mut self) {
        self.failure.blocked = false;
        self.failure.reason = None;
    }

    /// Mark balances stale; the next refresh that starts at or after `now` clears it.
    pub fn request_balance_refresh(&mut self, now: TimeMs) {
        self.swap.awaiting_balance_refresh = true;
        self.swap.refresh_requested_at = Some(now);
    }
}
