//! Externally reported controller state. Observability only.

use super::rebalance::plans_waiting_close;
use crate::domain::{ControllerContext, Flow, Intent, Reason, Snapshot, Stage};
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControllerState {
    Idle,
    Active,
    RebalanceWaitClose,
    InventorySwap,
    ReadyToOpen,
    WaitSwap,
    #[serde(rename = "STOPLOSS_PAUSE")]
    StopLossPause,
    ManualStop,
    LpFailure,
}

impl ControllerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ControllerState::Idle => "IDLE",
            ControllerState::Active => "ACTIVE",
            ControllerState::RebalanceWaitClose => "REBALANCE_WAIT_CLOSE",
            ControllerState::InventorySwap => "INVENTORY_SWAP",
            ControllerState::ReadyToOpen => "READY_TO_OPEN",
            ControllerState::WaitSwap => "WAIT_SWAP",
            ControllerState::StopLossPause => "STOPLOSS_PAUSE",
            ControllerState::ManualStop => "MANUAL_STOP",
            ControllerState::LpFailure => "LP_FAILURE",
        }
    }

    /// Map the tick's intent to a reported state, in dispatcher priority order.
    pub fn derive(intent: &Intent, ctx: &ControllerContext, snapshot: &Snapshot) -> Self {
        let reason = intent.reason();
        match intent.flow() {
            Flow::Manual => return ControllerState::ManualStop,
            Flow::Failure => return ControllerState::LpFailure,
            _ => {}
        }
        if matches!(
            reason,
            Reason::InventoryInProgress
                | Reason::LiquidateInProgress
                | Reason::SwapInProgress
                | Reason::ConcurrentSwaps
        ) {
            return ControllerState::WaitSwap;
        }
        if intent.flow() == Flow::StopLoss {
            return ControllerState::StopLossPause;
        }
        if intent.stage() == Stage::SubmitSwap {
            return ControllerState::InventorySwap;
        }
        if intent.flow() == Flow::Rebalance {
            if intent.stage() == Stage::StopLp || plans_waiting_close(ctx, snapshot) > 0 {
                return ControllerState::RebalanceWaitClose;
            }
            return ControllerState::ReadyToOpen;
        }
        if intent.flow() == Flow::Entry && intent.stage() == Stage::SubmitLp {
            return ControllerState::ReadyToOpen;
        }
        if reason == Reason::LpActive || snapshot.has_active_lp() {
            return ControllerState::Active;
        }
        ControllerState::Idle
    }
}

impl fmt::Display for ControllerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{LPView, RebalancePlan, TimeMs};

    #[test]
    fn test_priority_mapping() {
        let ctx = ControllerContext::new();
        let snapshot = Snapshot::default();
        let cases = [
            (Intent::new(Flow::Manual, Stage::StopLp, Reason::ManualKillSwitch), ControllerState::ManualStop),
            (Intent::wait(Flow::Failure, Reason::RetriesExceeded), ControllerState::LpFailure),
            (Intent::wait(Flow::StopLoss, Reason::LiquidateInProgress), ControllerState::WaitSwap),
            (Intent::wait(Flow::StopLoss, Reason::Cooldown), ControllerState::StopLossPause),
            (Intent::new(Flow::Entry, Stage::SubmitSwap, Reason::EntryInventory), ControllerState::InventorySwap),
            (Intent::new(Flow::Rebalance, Stage::StopLp, Reason::OutOfRangeRebalance), ControllerState::RebalanceWaitClose),
            (Intent::wait(Flow::Rebalance, Reason::ReopenWait), ControllerState::ReadyToOpen),
            (Intent::new(Flow::Entry, Stage::SubmitLp, Reason::EntryOpen), ControllerState::ReadyToOpen),
            (Intent::wait(Flow::None, Reason::LpActive), ControllerState::Active),
            (Intent::wait(Flow::Entry, Reason::EntryNotTriggered), ControllerState::Idle),
        ];
        for (intent, expected) in cases {
            assert_eq!(ControllerState::derive(&intent, &ctx, &snapshot), expected, "{}", intent);
        }
    }

    #[test]
    fn test_reopen_wait_with_closing_position() {
        let mut ctx = ControllerContext::new();
        ctx.rebalance
            .plans
            .insert("lp-1".into(), RebalancePlan::new(TimeMs::new(0), 5));
        let mut snapshot = Snapshot::default();
        let mut view = LPView::new("lp-1");
        view.is_active = true;
        snapshot.lp.insert("lp-1".into(), view);
        let intent = Intent::wait(Flow::Rebalance, Reason::ReopenWait);
        assert_eq!(
            ControllerState::derive(&intent, &ctx, &snapshot),
            ControllerState::RebalanceWaitClose
        );
    }

    #[test]
    fn test_serializes_screaming_case() {
        assert_eq!(
            serde_json::to_value(ControllerState::StopLossPause).unwrap(),
            "STOPLOSS_PAUSE"
        );
        assert_eq!(
            serde_json::to_value(ControllerState::ReadyToOpen).unwrap(),
            "READY_TO_OPEN"
        );
    }
}
