//! PnL stop-loss against frozen budget anchors, and the follow-up liquidation.

use super::budget::PositionBudget;
use super::swap::{attempts_remain, swap_command};
use crate::config::{ControllerConfig, LiquidationMode};
use crate::domain::{
    Command, ControllerContext, Decimal, Decision, DecisionLog, DecisionPatch, Flow, Intent,
    LogTopic, Reason, Snapshot, Stage, SwapPurpose, TradeSide,
};

/// Equity and trigger level for one anchored position.
#[derive(Debug, Clone, PartialEq)]
pub struct StopLossCheck {
    pub position_id: String,
    pub anchor: Decimal,
    pub equity: Decimal,
    pub trigger_level: Decimal,
}

impl StopLossCheck {
    pub fn triggered(&self) -> bool {
        self.equity <= self.trigger_level
    }
}

/// `anchor * (1 - pnl_fraction)`.
pub fn trigger_level(anchor: Decimal, pnl_fraction: Decimal) -> Decimal {
    anchor - anchor * pnl_fraction
}

/// Evaluate every live, settled position that has a valid anchor.
pub fn checks(
    config: &ControllerConfig,
    ctx: &ControllerContext,
    snapshot: &Snapshot,
) -> Vec<StopLossCheck> {
    let Some(price) = snapshot.valid_price() else {
        return Vec::new();
    };
    snapshot
        .active_lp()
        .filter(|view| !view.in_transition())
        .filter_map(|view| {
            let anchor = ctx.lp.get(&view.id)?.valid_anchor()?;
            let equity = anchor.equity(view.value_at(price)?, price)?;
            Some(StopLossCheck {
                position_id: view.id.clone(),
                anchor: anchor.value_quote,
                equity,
                trigger_level: trigger_level(anchor.value_quote, config.stop_loss_pnl_pct),
            })
        })
        .collect()
}

pub fn check_stop_loss(
    config: &ControllerConfig,
    ctx: &ControllerContext,
    snapshot: &Snapshot,
) -> Option<Decision> {
    if !config.stop_loss_enabled() || ctx.stoploss.pause_active(snapshot.now) {
        return None;
    }
    let price = snapshot.valid_price()?;
    let hit = checks(config, ctx, snapshot)
        .into_iter()
        .find(StopLossCheck::triggered)?;

    let stopped: Vec<&str> = snapshot
        .active_lp()
        .filter(|view| !view.is_closing())
        .map(|view| view.id.as_str())
        .collect();

    let now = snapshot.now;
    let mut patch = DecisionPatch {
        clear_all_plans: true,
        stoploss_until: Some(now.plus_secs(config.stop_loss_pause_sec)),
        last_exit_reason: Some(Reason::StopLossTriggered),
        ..Default::default()
    };
    if config.stop_loss_liquidation_mode == LiquidationMode::Quote {
        patch.pending_liquidation = Some(true);
        patch.reset_liquidation_attempt = true;
        patch.liquidation_target_base = Some(liquidation_target(config, ctx, &stopped, price));
    }

    let log = DecisionLog::new(LogTopic::StopLoss, "triggered")
        .with("position", &hit.position_id)
        .with("equity", hit.equity)
        .with("anchor", hit.anchor)
        .with("trigger_level", hit.trigger_level);

    Some(
        Decision::new(Intent::new(
            Flow::StopLoss,
            Stage::StopLp,
            Reason::StopLossTriggered,
        ))
        .with_commands(stopped.iter().map(|id| Command::stop(*id)).collect())
        .with_patch(patch)
        .with_log(log),
    )
}

/// Remembered opening base of the stopped positions, else the planned target base.
fn liquidation_target(
    config: &ControllerConfig,
    ctx: &ControllerContext,
    stopped: &[&str],
    price: Decimal,
) -> Decimal {
    let remembered: Vec<Decimal> = stopped
        .iter()
        .filter_map(|id| ctx.lp.get(*id).and_then(|lp| lp.open_base))
        .collect();
    if !remembered.is_empty() {
        return remembered.into_iter().sum();
    }
    PositionBudget::from_config(config, price)
        .map(|budget| budget.target_base)
        .unwrap_or_default()
}

/// Sell base back to quote after a stop-loss. Only called while liquidation is pending.
pub fn plan_liquidation(
    config: &ControllerConfig,
    ctx: &ControllerContext,
    snapshot: &Snapshot,
) -> Decision {
    let now = snapshot.now;
    let attempts = ctx.stoploss.liquidation_attempts;
    if !attempts_remain(config.max_stoploss_liquidation_attempts, attempts) {
        let log = DecisionLog::new(LogTopic::Liquidation, "attempts exhausted")
            .with("attempts", attempts)
            .with("target", ctx.stoploss.liquidation_target_base.unwrap_or_default());
        return Decision::wait(Flow::StopLoss, Reason::LiquidationAttemptsExhausted)
            .with_patch(DecisionPatch {
                set_failure: Some(Reason::LiquidationAttemptsExhausted),
                pending_liquidation: Some(false),
                ..Default::default()
            })
            .with_log(log);
    }
    if let Some(last) = ctx.stoploss.last_liquidation_attempt {
        if config.cooldown_seconds > 0 && !now.has_elapsed(last, config.cooldown_seconds) {
            return Decision::wait(Flow::StopLoss, Reason::LiquidationCooldown);
        }
    }
    if ctx.swap.awaiting_balance_refresh {
        return Decision::wait(Flow::StopLoss, Reason::WaitBalanceRefresh);
    }
    let Some(price) = snapshot.valid_price() else {
        return Decision::wait(Flow::StopLoss, Reason::PriceUnavailable);
    };

    let target = ctx
        .stoploss
        .liquidation_target_base
        .unwrap_or(snapshot.wallet_base)
        .non_negative();
    let amount = snapshot.wallet_base.min(target);

    if !amount.is_positive() {
        return finish(Reason::StopLossNoLiquidation);
    }
    let min_value = config.min_swap_value();
    let value = amount.checked_mul(price).unwrap_or(min_value);
    if min_value.is_positive() && value < min_value {
        return finish(Reason::StopLossLiquidationDust);
    }

    let sell = config.apply_swap_buffer(amount);
    let command = swap_command(
        config,
        TradeSide::Sell,
        sell,
        false,
        SwapPurpose::Liquidation,
        now,
    );
    let mut patch = DecisionPatch {
        liquidation_attempt: Some(now),
        liquidation_attempts: Some(attempts.saturating_add(1)),
        ..Default::default()
    };
    if let Some(id) = command.created_id() {
        patch.record_inflight.insert(id.to_string(), now);
    }
    let log = DecisionLog::new(LogTopic::Liquidation, "submit")
        .with("amount", sell)
        .with("target", target)
        .with("price", price);

    Decision::new(Intent::new(
        Flow::StopLoss,
        Stage::SubmitSwap,
        Reason::StopLossLiquidation,
    ))
    .with_command(command)
    .with_patch(patch)
    .with_log(log)
}

fn finish(reason: Reason) -> Decision {
    Decision::wait(Flow::StopLoss, reason).with_patch(DecisionPatch {
        pending_liquidation: Some(false),
        ..Default::default()
    })
}
