//! Serializable per-tick status report.

use crate::config::ControllerConfig;
use crate::domain::{ControllerContext, Decimal, Flow, Intent, Snapshot, Stage, TimeMs};
use crate::engine::stoploss;
use crate::engine::ControllerState;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ControllerStatus {
    pub controller_id: String,
    pub timestamp: TimeMs,
    pub state: ControllerState,
    pub reason: String,
    pub flow: Flow,
    pub stage: Stage,
    pub price: Option<Decimal>,
    pub wallet_base: Decimal,
    pub wallet_quote: Decimal,
    pub active_position_id: Option<String>,
    pub anchor_value_quote: Option<Decimal>,
    pub equity_quote: Option<Decimal>,
    pub stop_loss_trigger_quote: Option<Decimal>,
    /// Quote per second.
    pub fee_rate_ewma: Option<Decimal>,
    pub pending_plans: usize,
    pub rebalances_last_hour: usize,
    pub paused_until: Option<TimeMs>,
    pub failure_reason: Option<String>,
}

impl ControllerStatus {
    pub fn build(
        config: &ControllerConfig,
        intent: &Intent,
        ctx: &ControllerContext,
        snapshot: &Snapshot,
    ) -> Self {
        let active = snapshot.active_lp().next();
        let check = active.and_then(|view| {
            stoploss::checks(config, ctx, snapshot)
                .into_iter()
                .find(|c| c.position_id == view.id)
        });
        let lp_ctx = active.and_then(|view| ctx.lp.get(&view.id));

        ControllerStatus {
            controller_id: config.id.clone(),
            timestamp: snapshot.now,
            state: ControllerState::derive(intent, ctx, snapshot),
            reason: intent.reason().as_str().to_string(),
            flow: intent.flow(),
            stage: intent.stage(),
            price: snapshot.valid_price(),
            wallet_base: snapshot.wallet_base,
            wallet_quote: snapshot.wallet_quote,
            active_position_id: active.map(|view| view.id.clone()),
            anchor_value_quote: lp_ctx
                .and_then(|lp| lp.valid_anchor())
                .map(|anchor| anchor.value_quote),
            equity_quote: check.as_ref().map(|c| c.equity),
            stop_loss_trigger_quote: check
                .as_ref()
                .filter(|_| config.stop_loss_enabled())
                .map(|c| c.trigger_level),
            fee_rate_ewma: lp_ctx.and_then(|lp| lp.fee.rate_ewma),
            pending_plans: ctx.rebalance.plans.len(),
            rebalances_last_hour: ctx.rebalance.window.count_within(snapshot.now),
            paused_until: ctx
                .stoploss
                .until
                .filter(|_| ctx.stoploss.pause_active(snapshot.now)),
            failure_reason: ctx
                .failure
                .reason
                .filter(|_| ctx.failure.blocked)
                .map(|r| r.as_str().to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{BudgetAnchor, LPView, LpContext, LpState, Reason};

    fn d(s: &str) -> Decimal {
        Decimal::from_str_canonical(s).unwrap()
    }

    #[test]
    fn test_status_reports_anchor_and_trigger() {
        let config: ControllerConfig = serde_json::from_value(serde_json::json!({
            "id": "c", "connector_name": "clmm", "router_connector": "router",
            "trading_pair": "SOL-USDC", "pool_address": "p", "position_value_quote": 1000,
            "stop_loss_pnl_pct": 0.05
        }))
        .unwrap();
        let mut ctx = ControllerContext::new();
        ctx.lp.insert(
            "lp-1".into(),
            LpContext {
                anchor: Some(BudgetAnchor {
                    value_quote: d("1000"),
                    deployed_quote: d("1000"),
                    wallet_base_amount: d("0"),
                    wallet_quote_amount: d("0"),
                    created_at: TimeMs::from_secs(0),
                }),
                ..Default::default()
            },
        );
        let mut snapshot = Snapshot {
            now: TimeMs::from_secs(10),
            current_price: Some(d("100")),
            ..Default::default()
        };
        let mut view = LPView::new("lp-1");
        view.is_active = true;
        view.state = Some(LpState::InRange);
        view.base_amount = d("5");
        view.quote_amount = d("480");
        snapshot.lp.insert("lp-1".into(), view);

        let intent = Intent::wait(Flow::None, Reason::LpActive);
        let status = ControllerStatus::build(&config, &intent, &ctx, &snapshot);
        assert_eq!(status.state, ControllerState::Active);
        assert_eq!(status.reason, "lp_active");
        assert_eq!(status.active_position_id.as_deref(), Some("lp-1"));
        assert_eq!(status.anchor_value_quote, Some(d("1000")));
        assert_eq!(status.equity_quote, Some(d("980")));
        assert_eq!(status.stop_loss_trigger_quote, Some(d("950")));
        assert_eq!(status.failure_reason, None);

        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["state"], "ACTIVE");
        assert_eq!(json["flow"], "NONE");
    }
}
