//! Budget planning and value-at-risk anchors.

use crate::config::ControllerConfig;
use crate::domain::{BudgetAnchor, ControllerContext, Decimal, LPView, Snapshot, TimeMs};

/// Target split of a quote budget at a given price.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionBudget {
    pub total_quote: Decimal,
    pub target_base: Decimal,
    pub target_quote: Decimal,
}

impl PositionBudget {
    /// `None` when the budget or the price is not positive.
    pub fn plan(total_quote: Decimal, base_value_fraction: Decimal, price: Decimal) -> Option<Self> {
        if !total_quote.is_positive() {
            return None;
        }
        let fraction = base_value_fraction.non_negative().min(Decimal::one());
        let base_value = total_quote * fraction;
        let target_base = base_value.checked_div(price).filter(|_| price.is_positive())?;
        Some(PositionBudget {
            total_quote,
            target_base,
            target_quote: total_quote - base_value,
        })
    }

    pub fn from_config(config: &ControllerConfig, price: Decimal) -> Option<Self> {
        Self::plan(config.position_value_quote, config.target_base_value_pct, price)
    }
}

/// Anchor for one position, or `None` if it would not be positive or overflows.
///
/// The wallet slice is `min(wallet value, budget - deployed)`, split in the
/// wallet's own base/quote value ratio.
pub fn build_anchor(
    view: &LPView,
    price: Decimal,
    wallet_base: Decimal,
    wallet_quote: Decimal,
    budget_quote: Decimal,
    now: TimeMs,
) -> Option<BudgetAnchor> {
    let deployed = view.value_at(price)?;
    let wallet_base_value = wallet_base.checked_mul(price)?;
    let wallet_value = wallet_base_value.checked_add(wallet_quote)?;
    let remaining = budget_quote - deployed;

    let (slice_base, slice_quote) = if remaining.is_positive() && wallet_value.is_positive() {
        let slice = wallet_value.min(remaining);
        let base_share = wallet_base_value.checked_div(wallet_value)?;
        let base_value = slice.checked_mul(base_share)?;
        (base_value.checked_div(price)?, slice - base_value)
    } else {
        (Decimal::zero(), Decimal::zero())
    };

    let value_quote = deployed
        .checked_add(slice_base.checked_mul(price)?)?
        .checked_add(slice_quote)?;
    if !value_quote.is_positive() {
        return None;
    }
    Some(BudgetAnchor {
        value_quote,
        deployed_quote: deployed,
        wallet_base_amount: slice_base,
        wallet_quote_amount: slice_quote,
        created_at: now,
    })
}

/// Create anchors for live positions that lack a valid one.
///
/// Positions in transition are skipped because their amounts are not settled.
pub fn ensure_anchors(ctx: &mut ControllerContext, snapshot: &Snapshot, config: &ControllerConfig) {
    let Some(price) = snapshot.valid_price() else {
        return;
    };
    if ctx.swap.awaiting_balance_refresh {
        return;
    }
    for view in snapshot.active_lp() {
        if view.in_transition() {
            continue;
        }
        // not yet on chain
        if view.position_address.as_deref().map_or(true, str::is_empty) {
            continue;
        }
        let lp = ctx.lp.entry(view.id.clone()).or_default();
        if lp.valid_anchor().is_some() {
            continue;
        }
        if let Some(anchor) = build_anchor(
            view,
            price,
            snapshot.wallet_base,
            snapshot.wallet_quote,
            config.position_value_quote,
            snapshot.now,
        ) {
            tracing::info!(
                position = %view.id,
                anchor = %anchor.value_quote,
                deployed = %anchor.deployed_quote,
                "budget anchor set"
            );
            lp.anchor = Some(anchor);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::LpState;

    fn d(s: &str) -> Decimal {
        Decimal::from_str_canonical(s).unwrap()
    }

    fn position(base: &str, quote: &str) -> LPView {
        let mut view = LPView::new("lp-1");
        view.is_active = true;
        view.state = Some(LpState::InRange);
        view.base_amount = d(base);
        view.quote_amount = d(quote);
        view.position_address = Some("pos1".into());
        view
    }

    #[test]
    fn test_budget_plan_split() {
        let plan = PositionBudget::plan(d("1000"), d("0.5"), d("100")).unwrap();
        assert_eq!(plan.target_base, d("5"));
        assert_eq!(plan.target_quote, d("500"));
        assert!(PositionBudget::plan(d("0"), d("0.5"), d("100")).is_none());
        assert!(PositionBudget::plan(d("1000"), d("0.5"), d("0")).is_none());
    }

    #[test]
    fn test_anchor_includes_proportional_wallet_slice() {
        let view = position("3", "300");
        let anchor =
            build_anchor(&view, d("100"), d("2"), d("300"), d("1000"), TimeMs::new(1)).unwrap();
        // deployed 600, wallet 500, remaining budget 400
        assert_eq!(anchor.deployed_quote, d("600"));
        assert_eq!(anchor.wallet_base_amount, d("1.6"));
        assert_eq!(anchor.wallet_quote_amount, d("240"));
        assert_eq!(anchor.value_quote, d("1000"));
    }

    #[test]
    fn test_anchor_is_deployed_only_when_budget_spent() {
        let view = position("5", "500");
        let anchor =
            build_anchor(&view, d("100"), d("1"), d("50"), d("1000"), TimeMs::new(1)).unwrap();
        assert_eq!(anchor.value_quote, d("1000"));
        assert_eq!(anchor.wallet_base_amount, Decimal::zero());
        assert_eq!(anchor.wallet_quote_amount, Decimal::zero());
    }

    #[test]
    fn test_anchor_none_when_nothing_at_risk() {
        let view = position("0", "0");
        assert!(build_anchor(&view, d("100"), d("0"), d("0"), d("1000"), TimeMs::new(1)).is_none());
    }

    #[test]
    fn test_ensure_anchors_never_recomputes_valid_anchor() {
        let config: ControllerConfig = serde_json::from_value(serde_json::json!({
            "id": "c", "connector_name": "clmm", "router_connector": "router",
            "trading_pair": "SOL-USDC", "pool_address": "p", "position_value_quote": 1000
        }))
        .unwrap();
        let mut snapshot = Snapshot {
            now: TimeMs::from_secs(10),
            current_price: Some(d("100")),
            wallet_quote: d("500"),
            ..Default::default()
        };
        snapshot.lp.insert("lp-1".into(), position("5", "0"));

        let mut ctx = ControllerContext::new();
        ensure_anchors(&mut ctx, &snapshot, &config);
        let first = ctx.lp["lp-1"].anchor.clone().unwrap();
        assert_eq!(first.value_quote, d("1000"));

        snapshot.current_price = Some(d("50"));
        ensure_anchors(&mut ctx, &snapshot, &config);
        assert_eq!(ctx.lp["lp-1"].anchor.as_ref(), Some(&first));
    }

    #[test]
    fn test_ensure_anchors_skips_transitioning_positions() {
        let config: ControllerConfig = serde_json::from_value(serde_json::json!({
            "id": "c", "connector_name": "clmm", "router_connector": "router",
            "trading_pair": "SOL-USDC", "pool_address": "p", "position_value_quote": 1000
        }))
        .unwrap();
        let mut view = position("5", "0");
        view.state = Some(LpState::Opening);
        let mut snapshot = Snapshot {
            current_price: Some(d("100")),
            ..Default::default()
        };
        snapshot.lp.insert("lp-1".into(), view);
        let mut ctx = ControllerContext::new();
        ensure_anchors(&mut ctx, &snapshot, &config);
        assert!(ctx.lp.get("lp-1").is_none());
    }

    #[test]
    fn test_ensure_anchors_waits_for_position_address() {
        let config: ControllerConfig = serde_json::from_value(serde_json::json!({
            "id": "c", "connector_name": "clmm", "router_connector": "router",
            "trading_pair": "SOL-USDC", "pool_address": "p", "position_value_quote": 1000
        }))
        .unwrap();
        let mut view = position("5", "500");
        view.position_address = None;
        let mut snapshot = Snapshot {
            now: TimeMs::from_secs(10),
            current_price: Some(d("100")),
            ..Default::default()
        };
        snapshot.lp.insert("lp-1".into(), view);
        let mut ctx = ControllerContext::new();
        ensure_anchors(&mut ctx, &snapshot, &config);
        assert!(ctx.lp.get("lp-1").is_none());

        if let Some(view) = snapshot.lp.get_mut("lp-1") {
            view.position_address = Some("pos1".into());
        }
        ensure_anchors(&mut ctx, &snapshot, &config);
        assert_eq!(
            ctx.lp["lp-1"].anchor.as_ref().map(|a| a.value_quote),
            Some(d("1000"))
        );
    }
}
