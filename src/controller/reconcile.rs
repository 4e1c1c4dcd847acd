//! Per-tick bookkeeping over finished executors, run before the engine decides.

use crate::domain::{ControllerContext, DecisionPatch, Snapshot, SwapPurpose, SwapView};
use crate::engine::INFLIGHT_GRACE_SECS;
use tracing::{info, warn};

/// Settle newly finished swaps and positions, and resolve in-flight command ids.
///
/// Any executor that moved funds back into the wallet marks balances stale.
pub fn reconcile(ctx: &ControllerContext, snapshot: &Snapshot) -> DecisionPatch {
    let now = snapshot.now;
    let mut patch = DecisionPatch::default();

    for view in snapshot.lp.values() {
        if !view.is_done || ctx.closed_lp.contains(&view.id) {
            continue;
        }
        patch.settle_lps.insert(view.id.clone());
        patch.request_balance_refresh = Some(now);
        info!(
            position = %view.id,
            close_type = ?view.close_type,
            "position closed; balance sync requested"
        );
    }

    for swap in snapshot.swaps.values() {
        if !swap.is_done || ctx.swap.settled.contains(&swap.id) {
            continue;
        }
        patch.settle_swaps.insert(swap.id.clone());
        let completed = swap.completed();
        info!(
            swap_id = %swap.id,
            purpose = swap.label(),
            completed,
            "swap settled"
        );
        match (swap.purpose, completed) {
            (Some(SwapPurpose::Liquidation), true) => {
                patch.request_balance_refresh = Some(now);
                patch.liquidation_attempt = Some(now);
                settle_liquidation(ctx, swap, &mut patch);
            }
            (Some(SwapPurpose::Liquidation), false) => {
                patch.liquidation_attempt = Some(now);
            }
            (Some(SwapPurpose::Inventory), true) => {
                patch.request_balance_refresh = Some(now);
                patch.inventory_swap_failed = Some(false);
            }
            (Some(SwapPurpose::Inventory), false) => {
                patch.inventory_swap_failed = Some(true);
            }
            (None, true) => {
                patch.request_balance_refresh = Some(now);
            }
            (None, false) => {}
        }
    }

    for (id, submitted) in &ctx.inflight {
        if snapshot.knows(id) {
            patch.resolve_inflight.insert(id.clone());
        } else if now.has_elapsed(*submitted, INFLIGHT_GRACE_SECS) {
            warn!(
                command_id = %id,
                grace_sec = INFLIGHT_GRACE_SECS,
                "submitted command never appeared; dropping"
            );
            patch.resolve_inflight.insert(id.clone());
        }
    }

    patch
}

/// Reduce the liquidation target by what the swap sold; finish once nothing is left.
fn settle_liquidation(ctx: &ControllerContext, swap: &SwapView, patch: &mut DecisionPatch) {
    let target = ctx
        .stoploss
        .liquidation_target_base
        .filter(|_| ctx.stoploss.pending_liquidation);
    let remaining = target.map(|target| (target - swap.sold_base()).non_negative());
    match remaining {
        Some(left) if left.is_positive() => {
            info!(swap_id = %swap.id, remaining_base = %left, "partial liquidation");
            patch.liquidation_target_base = Some(left);
        }
        _ => patch.pending_liquidation = Some(false),
    }
}

/// Drop state for executors the host no longer reports.
///
/// Contexts of still in-flight opens are kept so their sizing survives until
/// the executor shows up. Returns the budget reservations of dropped positions.
pub fn prune(ctx: &mut ControllerContext, snapshot: &Snapshot) -> Vec<String> {
    let inflight = &ctx.inflight;
    let mut released = Vec::new();
    ctx.lp.retain(|id, lp| {
        let keep = inflight.contains_key(id)
            || snapshot.lp.get(id).map(|view| !view.is_done).unwrap_or(false);
        if !keep {
            released.extend(lp.reservation_id.take());
        }
        keep
    });
    ctx.closed_lp.retain(|id| snapshot.lp.contains_key(id));
    ctx.failure
        .acknowledged
        .retain(|id| snapshot.lp.contains_key(id));
    ctx.swap
        .settled
        .retain(|id| snapshot.swaps.contains_key(id));
    ctx.rebalance
        .out_of_range_since
        .retain(|id, _| snapshot.active_lp().any(|view| &view.id == id));
    ctx.rebalance.window.prune(snapshot.now);
    released
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CloseType, Decimal, LPView, LpContext, TimeMs};

    fn d(s: &str) -> Decimal {
        Decimal::from_str_canonical(s).unwrap()
    }

    fn done_swap(id: &str, purpose: Option<SwapPurpose>, close: CloseType) -> SwapView {
        let mut swap = SwapView::new(id, purpose);
        swap.is_done = true;
        swap.close_type = Some(close);
        swap
    }

    fn snapshot_with(swaps: Vec<SwapView>) -> Snapshot {
        let mut snapshot = Snapshot {
            now: TimeMs::from_secs(100),
            ..Default::default()
        };
        for swap in swaps {
            snapshot.swaps.insert(swap.id.clone(), swap);
        }
        snapshot
    }

    #[test]
    fn test_completed_liquidation_clears_pending_and_requests_refresh() {
        let mut ctx = ControllerContext::new();
        ctx.stoploss.pending_liquidation = true;
        ctx.stoploss.liquidation_target_base = Some(Decimal::one());
        let mut swap = done_swap("s1", Some(SwapPurpose::Liquidation), CloseType::Completed);
        swap.amount = Decimal::one();
        let snapshot = snapshot_with(vec![swap]);

        let patch = reconcile(&ctx, &snapshot);
        ctx.apply(&patch);
        assert!(!ctx.stoploss.pending_liquidation);
        assert_eq!(ctx.stoploss.liquidation_target_base, None);
        assert!(ctx.swap.awaiting_balance_refresh);
        assert_eq!(ctx.stoploss.last_liquidation_attempt, Some(TimeMs::from_secs(100)));
        assert!(ctx.swap.settled.contains("s1"));

        // settled swaps are not processed twice
        assert!(reconcile(&ctx, &snapshot).settle_swaps.is_empty());
    }

    #[test]
    fn test_partial_liquidation_reduces_target() {
        let mut ctx = ControllerContext::new();
        ctx.stoploss.pending_liquidation = true;
        ctx.stoploss.liquidation_target_base = Some(d("4"));
        let mut swap = done_swap("s1", Some(SwapPurpose::Liquidation), CloseType::Completed);
        swap.amount = d("3.92");
        swap.executed_base = Some(d("2.5"));

        ctx.apply(&reconcile(&ctx, &snapshot_with(vec![swap])));
        assert!(ctx.stoploss.pending_liquidation);
        assert_eq!(ctx.stoploss.liquidation_target_base, Some(d("1.5")));
        assert!(ctx.swap.awaiting_balance_refresh);
    }

    #[test]
    fn test_closed_position_requests_balance_sync_once() {
        let mut ctx = ControllerContext::new();
        let mut snapshot = snapshot_with(vec![]);
        let mut done = LPView::new("lp-1");
        done.is_done = true;
        done.close_type = Some(CloseType::Completed);
        snapshot.lp.insert("lp-1".into(), done);

        let patch = reconcile(&ctx, &snapshot);
        assert_eq!(patch.request_balance_refresh, Some(snapshot.now));
        ctx.apply(&patch);
        assert!(ctx.swap.awaiting_balance_refresh);
        assert!(ctx.closed_lp.contains("lp-1"));

        ctx.apply(&DecisionPatch {
            clear_balance_refresh: true,
            ..Default::default()
        });
        let patch = reconcile(&ctx, &snapshot);
        assert_eq!(patch.request_balance_refresh, None);
        assert!(patch.settle_lps.is_empty());
    }

    #[test]
    fn test_failed_liquidation_keeps_pending() {
        let mut ctx = ControllerContext::new();
        ctx.stoploss.pending_liquidation = true;
        let snapshot = snapshot_with(vec![done_swap(
            "s1",
            Some(SwapPurpose::Liquidation),
            CloseType::Failed,
        )]);
        ctx.apply(&reconcile(&ctx, &snapshot));
        assert!(ctx.stoploss.pending_liquidation);
        assert!(!ctx.swap.awaiting_balance_refresh);
        assert_eq!(ctx.stoploss.last_liquidation_attempt, Some(TimeMs::from_secs(100)));
    }

    #[test]
    fn test_inventory_outcomes() {
        let mut ctx = ControllerContext::new();
        let failed = snapshot_with(vec![done_swap(
            "s1",
            Some(SwapPurpose::Inventory),
            CloseType::Failed,
        )]);
        ctx.apply(&reconcile(&ctx, &failed));
        assert!(ctx.swap.inventory_swap_failed);

        let completed = snapshot_with(vec![done_swap(
            "s2",
            Some(SwapPurpose::Inventory),
            CloseType::Completed,
        )]);
        ctx.apply(&reconcile(&ctx, &completed));
        assert!(!ctx.swap.inventory_swap_failed);
        assert!(ctx.swap.awaiting_balance_refresh);
    }

    #[test]
    fn test_inflight_resolved_when_seen_or_expired() {
        let mut ctx = ControllerContext::new();
        ctx.inflight.insert("seen".into(), TimeMs::from_secs(95));
        ctx.inflight.insert("fresh".into(), TimeMs::from_secs(90));
        ctx.inflight.insert("stale".into(), TimeMs::from_secs(60));
        let mut snapshot = snapshot_with(vec![]);
        snapshot.lp.insert("seen".into(), LPView::new("seen"));

        ctx.apply(&reconcile(&ctx, &snapshot));
        assert_eq!(ctx.inflight.keys().collect::<Vec<_>>(), vec!["fresh"]);
    }

    #[test]
    fn test_prune_keeps_live_and_inflight_contexts() {
        let mut ctx = ControllerContext::new();
        for id in ["live", "done", "gone", "pending"] {
            ctx.lp.insert(
                id.into(),
                LpContext {
                    reservation_id: Some(format!("res-{}", id)),
                    ..Default::default()
                },
            );
        }
        ctx.inflight.insert("pending".into(), TimeMs::from_secs(99));
        ctx.swap.settled.insert("old-swap".into());
        ctx.closed_lp.insert("gone".into());
        ctx.closed_lp.insert("done".into());
        ctx.failure.acknowledged.insert("gone".into());
        ctx.failure.acknowledged.insert("done".into());
        ctx.rebalance
            .out_of_range_since
            .insert("done".into(), TimeMs::from_secs(1));

        let mut snapshot = snapshot_with(vec![]);
        let mut live = LPView::new("live");
        live.is_active = true;
        snapshot.lp.insert("live".into(), live);
        let mut done = LPView::new("done");
        done.is_done = true;
        snapshot.lp.insert("done".into(), done);

        let mut released = prune(&mut ctx, &snapshot);
        released.sort();
        assert_eq!(released, vec!["res-done", "res-gone"]);
        assert_eq!(ctx.lp.keys().collect::<Vec<_>>(), vec!["live", "pending"]);
        assert_eq!(ctx.closed_lp.iter().collect::<Vec<_>>(), vec!["done"]);
        assert_eq!(ctx.failure.acknowledged.iter().collect::<Vec<_>>(), vec!["done"]);
        assert!(ctx.swap.settled.is_empty());
        assert!(ctx.rebalance.out_of_range_since.is_empty());
    }
}
