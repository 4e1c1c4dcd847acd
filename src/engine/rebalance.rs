//! Out-of-range detection, rebalance stops and reopen selection.

use super::cost_filter::{self, CostFilterInput};
use crate::config::ControllerConfig;
use crate::domain::{
    Command, ControllerContext, Decimal, Decision, DecisionLog, DecisionPatch, Flow, Intent,
    LPView, Reason, RebalancePlan, Snapshot, Stage, TimeMs,
};

/// Outcome of one pass over the live positions.
///
/// `timers` holds out-of-range bookkeeping that must be committed whether or
/// not a stop fires. `log` carries the latest cost-filter verdict.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StopScan {
    pub decision: Option<Decision>,
    pub timers: DecisionPatch,
    pub log: Option<DecisionLog>,
}

/// Percent distance outside `[lower, upper]`, zero when inside.
pub fn deviation_pct(price: Decimal, lower: Decimal, upper: Decimal) -> Decimal {
    let distance = if price < lower {
        (lower - price).checked_div(lower)
    } else if price > upper {
        (price - upper).checked_div(upper)
    } else {
        None
    };
    distance
        .map(|d| d * Decimal::hundred())
        .unwrap_or_default()
}

pub fn scan_for_stop(
    config: &ControllerConfig,
    ctx: &ControllerContext,
    snapshot: &Snapshot,
) -> StopScan {
    let mut scan = StopScan::default();
    let Some(price) = snapshot.valid_price() else {
        return scan;
    };
    let now = snapshot.now;

    for view in snapshot.active_lp() {
        if view.in_transition() || ctx.rebalance.plans.contains_key(&view.id) {
            continue;
        }
        let Some((lower, upper)) = view.bounds() else {
            continue;
        };
        let tracked = ctx.rebalance.out_of_range_since.get(&view.id).copied();

        if price >= lower && price <= upper {
            if tracked.is_some() {
                scan.timers.clear_out_of_range_since.insert(view.id.clone());
            }
            continue;
        }
        if deviation_pct(price, lower, upper) < config.hysteresis_pct {
            continue;
        }

        let since = view.out_of_range_since.or(tracked).unwrap_or(now);
        if tracked != Some(since) {
            scan.timers
                .update_out_of_range_since
                .insert(view.id.clone(), since);
        }

        if !now.has_elapsed(since, config.rebalance_seconds) {
            continue;
        }
        if let Some(last) = ctx.rebalance.last_rebalance {
            if !now.has_elapsed(last, config.cooldown_seconds) {
                continue;
            }
        }
        if !ctx
            .rebalance
            .window
            .permits(now, config.max_rebalances_per_hour)
        {
            continue;
        }

        let Some(position_value) = view.value_at(price) else {
            continue;
        };
        let fee_rate = ctx.lp.get(&view.id).and_then(|lp| lp.fee.rate_ewma);
        let mut verdict = cost_filter::evaluate(&CostFilterInput::from_config(
            config,
            price,
            position_value,
            fee_rate,
        ));
        if !verdict.allows() {
            if cost_filter::should_force(now, since, config.rebalance_seconds) {
                verdict = verdict.forced();
            } else {
                scan.log = Some(verdict.to_log(&view.id));
                continue;
            }
        }

        let mut decision = stop_for_rebalance(config, view, now);
        if config.cost_filter_enabled {
            decision = decision.with_log(verdict.to_log(&view.id));
        }
        scan.decision = Some(decision);
        break;
    }
    scan
}

fn stop_for_rebalance(config: &ControllerConfig, view: &LPView, now: TimeMs) -> Decision {
    let mut patch = DecisionPatch {
        record_rebalance: Some(now),
        ..Default::default()
    };
    patch.add_plans.insert(
        view.id.clone(),
        RebalancePlan::new(now, config.reopen_delay_sec),
    );
    patch.clear_out_of_range_since.insert(view.id.clone());

    Decision::new(Intent::new(
        Flow::Rebalance,
        Stage::StopLp,
        Reason::OutOfRangeRebalance,
    ))
    .with_command(Command::stop(view.id.clone()))
    .with_patch(patch)
}

/// Plan to act on next: earliest due plan whose position is no longer live.
pub fn next_reopen<'a>(ctx: &'a ControllerContext, snapshot: &Snapshot) -> Option<&'a str> {
    ctx.rebalance
        .plans
        .iter()
        .filter(|(_, plan)| plan.reopen_after <= snapshot.now)
        .filter(|(id, _)| !snapshot.lp.get(*id).map(|v| v.is_active).unwrap_or(false))
        .min_by_key(|(id, plan)| (plan.reopen_after, id.as_str()))
        .map(|(id, _)| id.as_str())
}

/// Plans still waiting for their position to finish closing.
pub fn plans_waiting_close(ctx: &ControllerContext, snapshot: &Snapshot) -> usize {
    ctx.rebalance
        .plans
        .keys()
        .filter(|id| snapshot.lp.get(*id).map(|v| v.is_active).unwrap_or(false))
        .count()
}
