//! Pure decision core: (context, snapshot) -> Decision.
//!
//! Nothing here mutates [`ControllerContext`]. The one side effect is the
//! reservation request made by the open planner through the injected pool.

use crate::config::ControllerConfig;
use crate::domain::{
    CloseType, Command, ControllerContext, Decision, DecisionLog, DecisionPatch, Flow, Intent,
    LPView, LogTopic, LpState, Reason, Snapshot, Stage, SwapPurpose, SwapView, TokenOrderMapper,
};
use crate::error::ControllerError;
use crate::market::ReservationPool;
use std::fmt;
use std::sync::Arc;

pub mod budget;
pub mod cost_filter;
pub mod entry;
pub mod fee_estimator;
pub mod rate_limiter;
pub mod rebalance;
pub mod state;
pub mod stoploss;
pub mod swap;

pub use budget::{build_anchor, ensure_anchors, PositionBudget};
pub use cost_filter::{CostFilterInput, CostFilterOutcome, CostFilterVerdict};
pub use entry::OpenPlanner;
pub use fee_estimator::update_fee_estimates;
pub use rate_limiter::RebalanceWindow;
pub use state::ControllerState;

/// Submitted commands not yet visible in the executor list are dropped after this.
pub const INFLIGHT_GRACE_SECS: i64 = 30;

/// A decision policy for one controller.
pub trait DecisionPolicy: Send + Sync {
    fn decide(&self, ctx: &ControllerContext, snapshot: &Snapshot) -> Decision;
}

/// The guarded LP policy.
pub struct DecisionEngine {
    config: Arc<ControllerConfig>,
    mapper: TokenOrderMapper,
    pool: Arc<dyn ReservationPool>,
}

impl fmt::Debug for DecisionEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecisionEngine")
            .field("controller", &self.config.id)
            .field("mapper", &self.mapper)
            .finish()
    }
}

impl DecisionEngine {
    pub fn new(
        config: Arc<ControllerConfig>,
        pool: Arc<dyn ReservationPool>,
    ) -> Result<Self, ControllerError> {
        let reference = config.reference_pair()?;
        let pool_pair = config.pool_pair()?;
        let mapper = TokenOrderMapper::new(reference.clone(), pool_pair.clone()).ok_or_else(
            || ControllerError::InvalidTradingPair(format!("{} vs pool {}", reference, pool_pair)),
        )?;
        Ok(DecisionEngine {
            config,
            mapper,
            pool,
        })
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn mapper(&self) -> &TokenOrderMapper {
        &self.mapper
    }

    fn planner(&self) -> OpenPlanner<'_> {
        OpenPlanner {
            config: &self.config,
            mapper: &self.mapper,
            pool: self.pool.as_ref(),
        }
    }

    /// Stop every live LP. Swaps run to completion.
    fn manual_stop(&self, snapshot: &Snapshot) -> Decision {
        let commands: Vec<Command> = snapshot
            .active_lp()
            .filter(|view| !view.is_closing())
            .map(|view| Command::stop(view.id.clone()))
            .collect();
        Decision::new(Intent::new(
            Flow::Manual,
            Stage::StopLp,
            Reason::ManualKillSwitch,
        ))
        .with_commands(commands)
    }

    /// First unacknowledged LP that exhausted retries or closed as failed.
    fn detect_failure(&self, ctx: &ControllerContext, snapshot: &Snapshot) -> Option<Decision> {
        let (failed, reason) = snapshot.lp.values().find_map(|view| {
            if ctx.failure.acknowledged.contains(&view.id) {
                return None;
            }
            if view.state == Some(LpState::RetriesExceeded) {
                Some((view, Reason::RetriesExceeded))
            } else if view.close_type == Some(CloseType::Failed) {
                Some((view, Reason::ExecutorFailed))
            } else {
                None
            }
        })?;

        let commands = snapshot
            .active_lp()
            .filter(|view| !view.is_closing())
            .map(|view| Command::stop(view.id.clone()))
            .collect();
        let mut patch = DecisionPatch {
            set_failure: Some(reason),
            clear_all_plans: true,
            pending_liquidation: Some(false),
            ..Default::default()
        };
        patch.acknowledge_failures.insert(failed.id.clone());
        Some(
            Decision::new(Intent::new(Flow::Failure, Stage::StopLp, reason))
                .with_commands(commands)
                .with_patch(patch),
        )
    }

    /// Balances were requested but never confirmed within the timeout.
    fn balance_sync_timeout(&self, ctx: &ControllerContext, snapshot: &Snapshot) -> Option<Decision> {
        if !ctx.swap.awaiting_balance_refresh {
            return None;
        }
        let requested = ctx.swap.refresh_requested_at?;
        if !snapshot
            .now
            .has_elapsed(requested, self.config.balance_refresh_timeout_sec)
        {
            return None;
        }
        let patch = DecisionPatch {
            set_failure: Some(Reason::BalanceSyncTimeout),
            ..Default::default()
        };
        let log = DecisionLog::new(LogTopic::Failure, "balance sync timed out")
            .with("requested_at", requested)
            .with("timeout_sec", self.config.balance_refresh_timeout_sec);
        Some(
            Decision::wait(Flow::Failure, Reason::BalanceSyncTimeout)
                .with_patch(patch)
                .with_log(log),
        )
    }

    /// Keep the lowest-id live LP and stop the others.
    fn position_guard(&self, snapshot: &Snapshot) -> Option<Decision> {
        let live: Vec<&LPView> = snapshot
            .active_lp()
            .filter(|view| !view.is_closing())
            .collect();
        if live.len() <= 1 {
            return None;
        }
        let commands = live[1..]
            .iter()
            .map(|view| Command::stop(view.id.clone()))
            .collect();
        Some(Decision::wait(Flow::None, Reason::ConcurrentPositions).with_commands(commands))
    }

    fn swap_flow(&self, ctx: &ControllerContext, swap: &SwapView) -> Flow {
        match swap.purpose {
            Some(SwapPurpose::Liquidation) => Flow::StopLoss,
            _ if !ctx.rebalance.plans.is_empty() => Flow::Rebalance,
            _ => Flow::Entry,
        }
    }

    /// Keep one live swap and stop the rest.
    fn swap_guard(&self, ctx: &ControllerContext, snapshot: &Snapshot) -> Option<Decision> {
        let mut live: Vec<&SwapView> = snapshot.active_swaps().collect();
        if live.len() <= 1 {
            return None;
        }
        live.sort_by_key(|swap| {
            let rank = match swap.purpose {
                Some(SwapPurpose::Liquidation) => 0,
                Some(SwapPurpose::Inventory) => 1,
                None => 2,
            };
            (rank, swap.id.clone())
        });
        let kept = live[0];
        let commands = live[1..]
            .iter()
            .map(|swap| Command::stop(swap.id.clone()))
            .collect();
        Some(
            Decision::wait(self.swap_flow(ctx, kept), Reason::ConcurrentSwaps)
                .with_commands(commands),
        )
    }

    fn swap_in_progress(&self, ctx: &ControllerContext, snapshot: &Snapshot) -> Option<Decision> {
        let swap = snapshot.active_swaps().next()?;
        let reason = match swap.purpose {
            Some(SwapPurpose::Liquidation) => Reason::LiquidateInProgress,
            Some(SwapPurpose::Inventory) => Reason::InventoryInProgress,
            None => Reason::SwapInProgress,
        };
        Some(Decision::wait(self.swap_flow(ctx, swap), reason))
    }

    fn command_in_flight(&self, ctx: &ControllerContext, snapshot: &Snapshot) -> bool {
        ctx.inflight.iter().any(|(id, submitted)| {
            !snapshot.knows(id) && !snapshot.now.has_elapsed(*submitted, INFLIGHT_GRACE_SECS)
        })
    }

    fn reopen(&self, ctx: &ControllerContext, snapshot: &Snapshot) -> Decision {
        match rebalance::next_reopen(ctx, snapshot) {
            Some(plan) => self
                .planner()
                .plan(ctx, snapshot, Flow::Rebalance, Some(plan)),
            None => Decision::wait(Flow::Rebalance, Reason::ReopenWait),
        }
    }

    fn entry(&self, ctx: &ControllerContext, snapshot: &Snapshot) -> Decision {
        if let Some(gate) = entry::entry_gate(&self.config, ctx, snapshot) {
            return gate;
        }
        self.planner().plan(ctx, snapshot, Flow::Entry, None)
    }
}

impl DecisionPolicy for DecisionEngine {
    fn decide(&self, ctx: &ControllerContext, snapshot: &Snapshot) -> Decision {
        let config = self.config.as_ref();

        if config.manual_kill_switch {
            return self.manual_stop(snapshot);
        }
        if ctx.failure.blocked {
            let reason = ctx.failure.reason.unwrap_or(Reason::RetriesExceeded);
            return Decision::wait(Flow::Failure, reason);
        }
        if let Some(decision) = self.detect_failure(ctx, snapshot) {
            return decision;
        }
        if let Some(decision) = self.balance_sync_timeout(ctx, snapshot) {
            return decision;
        }
        if let Some(decision) = self.swap_guard(ctx, snapshot) {
            return decision;
        }
        if let Some(decision) = self.position_guard(snapshot) {
            return decision;
        }
        if self.command_in_flight(ctx, snapshot) {
            return Decision::wait(Flow::None, Reason::CommandInFlight);
        }
        if let Some(decision) = self.swap_in_progress(ctx, snapshot) {
            return decision;
        }
        if let Some(decision) = stoploss::check_stop_loss(config, ctx, snapshot) {
            return decision;
        }

        let scan = rebalance::scan_for_stop(config, ctx, snapshot);
        let mut decision = match scan.decision {
            Some(decision) => decision,
            None => self.after_scan(ctx, snapshot),
        };
        let mut patch = scan.timers;
        patch.absorb(decision.patch);
        decision.patch = patch;
        if decision.log.is_none() {
            decision.log = scan.log;
        }
        decision
    }
}

impl DecisionEngine {
    fn after_scan(&self, ctx: &ControllerContext, snapshot: &Snapshot) -> Decision {
        if snapshot.has_active_lp() && ctx.rebalance.plans.is_empty() {
            return Decision::wait(Flow::None, Reason::LpActive);
        }
        if ctx.stoploss.pending_liquidation {
            return stoploss::plan_liquidation(&self.config, ctx, snapshot);
        }
        if ctx.stoploss.pause_active(snapshot.now) {
            return Decision::wait(Flow::StopLoss, Reason::Cooldown);
        }
        if !ctx.rebalance.plans.is_empty() {
            return self.reopen(ctx, snapshot);
        }
        self.entry(ctx, snapshot)
    }
}
