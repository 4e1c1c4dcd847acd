//! Entry gates and the open planner shared by entry and rebalance reopen.

use super::budget::PositionBudget;
use super::swap::{attempts_remain, swap_command};
use crate::config::ControllerConfig;
use crate::domain::{
    command_id, Command, ControllerContext, Decimal, Decision, DecisionLog, DecisionPatch, Flow,
    Intent, LogTopic, LpSide, OpenPositionCommand, Reason, Snapshot, Stage, SwapPurpose,
    TokenOrderMapper, TradeSide,
};
use crate::market::{ReservationPool, ReservationRequest};

/// Signed base amount to trade before opening. Positive means buy base.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InventoryDelta {
    pub base: Decimal,
    pub quote_value: Decimal,
}

/// Price bounds for a new position around `price`, in reference order.
///
/// Both sides funded: centered. Base only: `[p, p(1+w)]`. Quote only: `[p(1-w), p]`.
pub fn range_bounds(price: Decimal, width_pct: Decimal, side: LpSide) -> (Decimal, Decimal) {
    let width = width_pct.percent_to_fraction();
    match side {
        LpSide::Both => {
            let half = width / Decimal::from_i64(2);
            (price * (Decimal::one() - half), price * (Decimal::one() + half))
        }
        LpSide::Base => (price, price * (Decimal::one() + width)),
        LpSide::Quote => (price * (Decimal::one() - width), price),
    }
}

/// Trade needed to reach the budget split from current wallet holdings.
///
/// Fails with `InsufficientBalance` when the wallet is worth less than the
/// budget or both sides are short at once.
pub fn inventory_delta(
    budget: &PositionBudget,
    wallet_base: Decimal,
    wallet_quote: Decimal,
    price: Decimal,
) -> Result<InventoryDelta, Reason> {
    let wallet_value = wallet_base
        .checked_mul(price)
        .and_then(|value| value.checked_add(wallet_quote));
    if matches!(wallet_value, Some(value) if value < budget.total_quote) {
        return Err(Reason::InsufficientBalance);
    }
    let base_deficit = (budget.target_base - wallet_base).non_negative();
    let quote_deficit = (budget.target_quote - wallet_quote).non_negative();
    if base_deficit.is_positive() && quote_deficit.is_positive() {
        return Err(Reason::InsufficientBalance);
    }

    let base = if base_deficit.is_positive() {
        let quote_surplus = (wallet_quote - budget.target_quote).non_negative();
        let affordable = quote_surplus
            .checked_div(price)
            .ok_or(Reason::PriceUnavailable)?;
        base_deficit.min(affordable)
    } else if quote_deficit.is_positive() {
        let base_surplus = (wallet_base - budget.target_base).non_negative();
        let needed = quote_deficit
            .checked_div(price)
            .ok_or(Reason::PriceUnavailable)?;
        -base_surplus.min(needed)
    } else {
        Decimal::zero()
    };
    Ok(InventoryDelta {
        base,
        quote_value: (base * price).abs(),
    })
}

/// Entry preconditions not shared with reopen.
pub fn entry_gate(
    config: &ControllerConfig,
    ctx: &ControllerContext,
    snapshot: &Snapshot,
) -> Option<Decision> {
    if config.target_price.is_positive() {
        let triggered = match snapshot.valid_price() {
            Some(price) if config.trigger_above => price >= config.target_price,
            Some(price) => price <= config.target_price,
            None => false,
        };
        if !triggered {
            return Some(Decision::wait(Flow::Entry, Reason::EntryNotTriggered));
        }
    }
    if !config.reenter_enabled && ctx.stoploss.last_exit_reason == Some(Reason::StopLossTriggered) {
        return Some(Decision::wait(Flow::Entry, Reason::ReenterDisabled));
    }
    None
}

/// Collaborators the open planner needs beyond config and state.
pub struct OpenPlanner<'a> {
    pub config: &'a ControllerConfig,
    pub mapper: &'a TokenOrderMapper,
    pub pool: &'a dyn ReservationPool,
}

impl<'a> OpenPlanner<'a> {
    /// Swap toward the budget split, or open a position.
    ///
    /// `consumed_plan` is the rebalance plan this open would satisfy.
    pub fn plan(
        &self,
        ctx: &ControllerContext,
        snapshot: &Snapshot,
        flow: Flow,
        consumed_plan: Option<&str>,
    ) -> Decision {
        let config = self.config;
        let (open_reason, swap_reason) = match flow {
            Flow::Rebalance => (Reason::RebalanceOpen, Reason::RebalanceInventory),
            _ => (Reason::EntryOpen, Reason::EntryInventory),
        };

        if ctx.swap.awaiting_balance_refresh {
            return Decision::wait(flow, Reason::WaitBalanceRefresh);
        }
        let Some(price) = snapshot.valid_price() else {
            return Decision::wait(flow, Reason::PriceUnavailable);
        };
        let Some(budget) = PositionBudget::from_config(config, price) else {
            return Decision::wait(flow, Reason::BudgetUnavailable);
        };
        let delta = match inventory_delta(&budget, snapshot.wallet_base, snapshot.wallet_quote, price)
        {
            Ok(delta) => delta,
            Err(reason) => return Decision::wait(flow, reason),
        };

        let needs_swap =
            !delta.base.is_zero() && delta.quote_value >= config.min_swap_value();
        let swap_allowed = !ctx.swap.inventory_swap_failed
            && attempts_remain(
                config.max_inventory_swap_attempts,
                ctx.swap.inventory_swap_attempts,
            );
        if needs_swap && swap_allowed {
            return self.plan_swap(ctx, snapshot, flow, swap_reason, delta);
        }

        let open_base = snapshot.wallet_base.min(budget.target_base).non_negative();
        let open_quote = snapshot.wallet_quote.min(budget.target_quote).non_negative();
        if !open_base.is_positive() && !open_quote.is_positive() {
            return Decision::wait(flow, Reason::InsufficientBalance);
        }
        self.open(snapshot, flow, open_reason, price, open_base, open_quote, consumed_plan)
    }

    fn plan_swap(
        &self,
        ctx: &ControllerContext,
        snapshot: &Snapshot,
        flow: Flow,
        reason: Reason,
        delta: InventoryDelta,
    ) -> Decision {
        let config = self.config;
        let now = snapshot.now;
        if !config.auto_swap_enabled {
            return Decision::wait(flow, Reason::SwapRequired);
        }
        if let Some(last) = ctx.swap.last_inventory_swap {
            if config.cooldown_seconds > 0 && !now.has_elapsed(last, config.cooldown_seconds) {
                return Decision::wait(flow, Reason::SwapCooldown);
            }
        }

        let (side, amount, amount_is_quote) = if delta.base.is_positive() {
            let spend = config
                .apply_swap_buffer(delta.quote_value)
                .min(snapshot.wallet_quote);
            (TradeSide::Buy, spend, true)
        } else {
            let sell = config
                .apply_swap_buffer(delta.base.abs())
                .min(snapshot.wallet_base);
            (TradeSide::Sell, sell, false)
        };
        if !amount.is_positive() {
            return Decision::wait(flow, Reason::SwapRequired);
        }

        let command = swap_command(config, side, amount, amount_is_quote, SwapPurpose::Inventory, now);
        let mut patch = DecisionPatch {
            last_inventory_swap: Some(now),
            inventory_swap_attempts: Some(ctx.swap.inventory_swap_attempts.saturating_add(1)),
            inventory_swap_failed: Some(false),
            ..Default::default()
        };
        if let Some(id) = command.created_id() {
            patch.record_inflight.insert(id.to_string(), now);
        }
        let log = DecisionLog::new(LogTopic::Entry, "inventory swap")
            .with("side", side)
            .with("amount", amount)
            .with("delta_base", delta.base);

        Decision::new(Intent::new(flow, Stage::SubmitSwap, reason))
            .with_command(command)
            .with_patch(patch)
            .with_log(log)
    }

    #[allow(clippy::too_many_arguments)]
    fn open(
        &self,
        snapshot: &Snapshot,
        flow: Flow,
        reason: Reason,
        price: Decimal,
        base: Decimal,
        quote: Decimal,
        consumed_plan: Option<&str>,
    ) -> Decision {
        let config = self.config;
        let mapper = self.mapper;
        let now = snapshot.now;

        let side = LpSide::from_amounts(base, quote);
        let (lower, upper) = range_bounds(price, config.position_width_pct, side);
        let Some((pool_lower, pool_upper)) = mapper.bounds_to_pool(lower, upper) else {
            return Decision::wait(flow, Reason::PriceUnavailable);
        };
        let (pool_base, pool_quote) = mapper.amounts_to_pool(base, quote);

        let reference = mapper.reference();
        let request = ReservationRequest::new(
            config.budget_key(),
            config.connector_name.clone(),
            [(reference.base.clone(), base), (reference.quote.clone(), quote)],
        )
        .with_native_floor(config.native_token_symbol.clone(), config.min_native_balance);
        let Some(reservation_id) = self.pool.reserve(&request) else {
            return Decision::wait(flow, Reason::ReservationDenied);
        };

        let id = command_id("lp", &config.id, now, &[base, quote]);
        let pool_pair = mapper.pool_pair();
        let command = Command::OpenPosition(OpenPositionCommand {
            id: id.clone(),
            connector: config.connector_name.clone(),
            pool_address: config.pool_address.clone(),
            trading_pair: pool_pair.to_string(),
            base_token: pool_pair.base.clone(),
            quote_token: pool_pair.quote.clone(),
            lower_price: pool_lower,
            upper_price: pool_upper,
            base_amount: pool_base,
            quote_amount: pool_quote,
            side: mapper.side_to_pool(side),
            reservation_id: reservation_id.clone(),
            budget_key: config.budget_key().to_string(),
        });

        let mut patch = DecisionPatch {
            inventory_swap_attempts: Some(0),
            ..Default::default()
        };
        patch.open_amounts.insert(id.clone(), (base, quote));
        patch.reservations.insert(id.clone(), reservation_id);
        patch.record_inflight.insert(id, now);
        if let Some(plan) = consumed_plan {
            patch.clear_plans.insert(plan.to_string());
        }
        let log = DecisionLog::new(LogTopic::Entry, "open")
            .with("lower", lower)
            .with("upper", upper)
            .with("base", base)
            .with("quote", quote)
            .with("price", price);

        Decision::new(Intent::new(flow, Stage::SubmitLp, reason))
            .with_command(command)
            .with_patch(patch)
            .with_log(log)
    }
}
