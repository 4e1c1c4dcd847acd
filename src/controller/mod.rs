//! The per-tick driver: observe, decide, commit, report.
//!
//! Each tick runs in a fixed order:
//! 1. Project executors into reference-order views and settle finished swaps
//! 2. Refresh balances and the pool price
//! 3. Freeze budget anchors and sample fee accrual
//! 4. Ask the policy for a decision and commit its patch
//! 5. Log and report

use crate::config::ControllerConfig;
use crate::domain::{
    Command, ControllerContext, Decision, DecisionPatch, Intent, LogTopic, Snapshot, Stage,
    TokenOrderMapper,
};
use crate::engine::{
    ensure_anchors, update_fee_estimates, ControllerState, DecisionEngine, DecisionPolicy,
};
use crate::error::ControllerError;
use crate::market::{MarketDataProvider, ReservationPool};
use crate::telemetry::LogThrottle;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

pub mod market_cache;
pub mod reconcile;
pub mod snapshot;
pub mod status;

pub use market_cache::{MarketCache, MarketReading};
pub use snapshot::{ExecutorInfo, ExecutorKind};
pub use status::ControllerStatus;

/// What one tick produced.
#[derive(Debug, Clone, PartialEq)]
pub struct TickOutcome {
    pub intent: Intent,
    pub commands: Vec<Command>,
    pub status: ControllerStatus,
}

pub struct Controller {
    config: Arc<ControllerConfig>,
    mapper: TokenOrderMapper,
    market: Arc<dyn MarketDataProvider>,
    pool: Arc<dyn ReservationPool>,
    policy: Arc<dyn DecisionPolicy>,
    ctx: ControllerContext,
    cache: MarketCache,
    throttle: LogThrottle,
    last_state: Option<ControllerState>,
}

impl Controller {
    pub fn new(
        config: ControllerConfig,
        market: Arc<dyn MarketDataProvider>,
        pool: Arc<dyn ReservationPool>,
    ) -> Result<Self, ControllerError> {
        config.validate()?;
        let config = Arc::new(config);
        let engine = DecisionEngine::new(config.clone(), pool.clone())?;
        let mapper = engine.mapper().clone();
        info!(
            controller = %config.id,
            pair = %mapper.reference(),
            pool_pair = %mapper.pool_pair(),
            pool_inverted = mapper.pool_inverted(),
            "controller initialized"
        );
        Ok(Controller {
            cache: MarketCache::new(config.log_throttle_sec),
            throttle: LogThrottle::new(config.log_throttle_sec),
            config,
            mapper,
            market,
            pool,
            policy: Arc::new(engine),
            ctx: ControllerContext::new(),
            last_state: None,
        })
    }

    /// Replace the decision policy.
    pub fn with_policy(mut self, policy: Arc<dyn DecisionPolicy>) -> Self {
        self.policy = policy;
        self
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn context(&self) -> &ControllerContext {
        &self.ctx
    }

    /// Manual reset of the sticky failure flag.
    ///
    /// A balance refresh still outstanding is requested again from now, so the
    /// sync timeout restarts instead of tripping on the next tick.
    pub fn clear_failure(&mut self) {
        if self.ctx.failure.blocked {
            info!(
                controller = %self.config.id,
                reason = ?self.ctx.failure.reason.map(|r| r.as_str()),
                "failure flag cleared"
            );
        }
        self.ctx.clear_failure();
        if self.ctx.swap.awaiting_balance_refresh {
            self.ctx.request_balance_refresh(self.market.time());
        }
    }

    pub async fn tick(&mut self, executors: &[ExecutorInfo]) -> TickOutcome {
        let now = self.market.time();
        let (lp, swaps) = snapshot::collect_views(&self.mapper, executors);
        let mut snapshot = Snapshot {
            now,
            lp,
            swaps,
            ..Default::default()
        };

        let settled = reconcile::reconcile(&self.ctx, &snapshot);
        self.ctx.apply(&settled);
        for reservation_id in reconcile::prune(&mut self.ctx, &snapshot) {
            let released = self.pool.release(&reservation_id);
            debug!(
                controller = %self.config.id,
                reservation = %reservation_id,
                released,
                "reservation released"
            );
        }

        let reading = self
            .cache
            .refresh(
                self.market.as_ref(),
                &self.config,
                &self.mapper,
                &self.ctx,
                now,
            )
            .await;
        if reading.refresh_satisfied {
            self.ctx.apply(&DecisionPatch {
                clear_balance_refresh: true,
                ..Default::default()
            });
        }
        snapshot.current_price = reading.current_price();
        snapshot.router_price = reading.router_price;
        snapshot.pool_price = reading.pool_price;
        snapshot.wallet_base = reading.wallet_base;
        snapshot.wallet_quote = reading.wallet_quote;

        ensure_anchors(&mut self.ctx, &snapshot, &self.config);
        update_fee_estimates(&mut self.ctx, &snapshot);

        let decision = self.policy.decide(&self.ctx, &snapshot);
        self.ctx.apply(&decision.patch);
        self.log_decision(&decision, &snapshot);

        let status = ControllerStatus::build(&self.config, &decision.intent, &self.ctx, &snapshot);
        if self.last_state != Some(status.state) {
            info!(
                controller = %self.config.id,
                "state change: {} -> {} ({})",
                self.last_state.map(|s| s.as_str()).unwrap_or("NONE"),
                status.state,
                decision.intent.reason()
            );
            self.last_state = Some(status.state);
        }

        TickOutcome {
            intent: decision.intent,
            commands: decision.commands,
            status,
        }
    }

    fn log_decision(&mut self, decision: &Decision, snapshot: &Snapshot) {
        let id = &self.config.id;
        let intent = &decision.intent;

        if let Some(reason) = decision.patch.set_failure {
            error!(
                controller = %id,
                reason = reason.as_str(),
                executors = ?decision.patch.acknowledge_failures,
                "controller blocked until manual reset"
            );
        }

        for command in &decision.commands {
            match command {
                Command::Stop(stop) => info!(
                    controller = %id,
                    target = %stop.target_id,
                    intent = %intent,
                    "stop submitted"
                ),
                Command::OpenPosition(open) => info!(
                    controller = %id,
                    command_id = %open.id,
                    lower = %open.lower_price,
                    upper = %open.upper_price,
                    base = %open.base_amount,
                    quote = %open.quote_amount,
                    side = ?open.side,
                    intent = %intent,
                    "open position submitted"
                ),
                Command::SubmitSwap(swap) => info!(
                    controller = %id,
                    command_id = %swap.id,
                    side = %swap.side,
                    amount = %swap.amount,
                    amount_is_quote = swap.amount_is_quote,
                    purpose = swap.purpose.label(),
                    intent = %intent,
                    "swap submitted"
                ),
            }
        }

        if decision.commands.is_empty() && intent.stage() == Stage::Wait {
            debug!(controller = %id, intent = %intent, "waiting");
        }

        let reason = intent.reason();
        if reason.is_config_boundary() && self.throttle.allow(reason.as_str(), snapshot.now) {
            warn!(
                controller = %id,
                reason = reason.as_str(),
                wallet_base = %snapshot.wallet_base,
                wallet_quote = %snapshot.wallet_quote,
                "open blocked"
            );
        }

        if let Some(log) = &decision.log {
            match log.topic {
                LogTopic::CostFilter => {
                    let interval = self.config.cooldown_seconds.max(60);
                    if self.throttle.allow_every("cost_filter", snapshot.now, interval) {
                        info!(controller = %id, "{} {}", log.summary, log.render_details());
                    }
                }
                _ => info!(controller = %id, "{} {}", log.summary, log.render_details()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Decimal, Flow, Reason, TimeMs};
    use crate::market::{FixedBudgetPool, MockMarketData};

    fn d(s: &str) -> Decimal {
        Decimal::from_str_canonical(s).unwrap()
    }

    fn config() -> ControllerConfig {
        serde_json::from_value(serde_json::json!({
            "id": "c", "connector_name": "clmm", "router_connector": "router",
            "trading_pair": "SOL-USDC", "pool_address": "p", "position_value_quote": 1000
        }))
        .unwrap()
    }

    struct AlwaysIdle;

    impl DecisionPolicy for AlwaysIdle {
        fn decide(&self, _ctx: &ControllerContext, _snapshot: &Snapshot) -> Decision {
            Decision::new(Intent::idle())
        }
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = config();
        config.position_width_pct = d("0");
        let result = Controller::new(
            config,
            Arc::new(MockMarketData::new()),
            Arc::new(FixedBudgetPool::new()),
        );
        assert!(matches!(result, Err(ControllerError::Config(_))));
    }

    #[tokio::test]
    async fn test_custom_policy_is_used() {
        let market = Arc::new(MockMarketData::new().with_rate("SOL-USDC", d("100")));
        let mut controller = Controller::new(config(), market, Arc::new(FixedBudgetPool::new()))
            .unwrap()
            .with_policy(Arc::new(AlwaysIdle));
        let outcome = controller.tick(&[]).await;
        assert_eq!(outcome.intent, Intent::idle());
        assert_eq!(outcome.status.state, ControllerState::Idle);
    }

    #[test]
    fn test_clearing_failure_restarts_balance_sync() {
        let market = Arc::new(
            MockMarketData::new()
                .with_time(TimeMs::from_secs(100))
                .with_rate("SOL-USDC", d("100")),
        );
        let mut controller =
            Controller::new(config(), market.clone(), Arc::new(FixedBudgetPool::new())).unwrap();
        controller.ctx.request_balance_refresh(TimeMs::from_secs(10));
        controller.ctx.apply(&DecisionPatch {
            set_failure: Some(Reason::BalanceSyncTimeout),
            ..Default::default()
        });

        controller.clear_failure();
        assert!(!controller.context().failure.blocked);
        assert_eq!(
            controller.context().swap.refresh_requested_at,
            Some(TimeMs::from_secs(100))
        );
    }

    #[tokio::test]
    async fn test_missing_price_waits() {
        let market = Arc::new(MockMarketData::new().with_time(TimeMs::from_secs(1)));
        let mut controller =
            Controller::new(config(), market, Arc::new(FixedBudgetPool::new())).unwrap();
        let outcome = controller.tick(&[]).await;
        assert_eq!(outcome.intent, Intent::wait(Flow::Entry, Reason::PriceUnavailable));
        assert!(outcome.commands.is_empty());
    }
}
