//! Wallet balance refresh and pool price caching.

use crate::config::ControllerConfig;
use crate::domain::{ControllerContext, Decimal, TimeMs, TokenOrderMapper};
use crate::market::{MarketDataError, MarketDataProvider, PoolInfo};
use crate::telemetry::LogThrottle;
use tracing::{debug, warn};

/// Market inputs for one tick, in reference order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MarketReading {
    pub router_price: Option<Decimal>,
    pub pool_price: Option<Decimal>,
    pub wallet_base: Decimal,
    pub wallet_quote: Decimal,
    /// A balance refresh that started after the last request succeeded.
    pub refresh_satisfied: bool,
}

impl MarketReading {
    /// Fresh pool price first, router rate otherwise.
    pub fn current_price(&self) -> Option<Decimal> {
        self.pool_price
            .filter(|p| p.is_positive())
            .or(self.router_price.filter(|p| p.is_positive()))
    }
}

#[derive(Debug, Clone)]
pub struct MarketCache {
    balances_fetched_at: Option<TimeMs>,
    pool_price: Option<(Decimal, TimeMs)>,
    throttle: LogThrottle,
}

impl MarketCache {
    pub fn new(log_throttle_sec: i64) -> Self {
        MarketCache {
            balances_fetched_at: None,
            pool_price: None,
            throttle: LogThrottle::new(log_throttle_sec),
        }
    }

    fn balances_due(&self, config: &ControllerConfig, ctx: &ControllerContext, now: TimeMs) -> bool {
        ctx.swap.awaiting_balance_refresh
            || self
                .balances_fetched_at
                .map(|at| now.has_elapsed(at, config.balance_refresh_interval_sec))
                .unwrap_or(true)
    }

    /// Refresh balances when due and the pool price every tick, concurrently.
    pub async fn refresh(
        &mut self,
        market: &dyn MarketDataProvider,
        config: &ControllerConfig,
        mapper: &TokenOrderMapper,
        ctx: &ControllerContext,
        now: TimeMs,
    ) -> MarketReading {
        let balances_due = self.balances_due(config, ctx, now);
        let balances = async {
            if balances_due {
                Some(market.update_balances(&config.router_connector).await)
            } else {
                None
            }
        };
        let pool = market.pool_info(&config.connector_name, &config.pool_address);
        let (balances, pool) = futures::join!(balances, pool);

        let mut refresh_satisfied = false;
        match balances {
            Some(Ok(())) => {
                self.balances_fetched_at = Some(now);
                refresh_satisfied = ctx.swap.awaiting_balance_refresh
                    && ctx
                        .swap
                        .refresh_requested_at
                        .map(|requested| now >= requested)
                        .unwrap_or(true);
            }
            Some(Err(e)) => self.warn_throttled("balance_refresh", now, &e),
            None => {}
        }
        self.record_pool(pool, mapper, now);

        let reference = mapper.reference();
        let balance = |token: &str| {
            market
                .get_balance(&config.router_connector, token)
                .unwrap_or_else(Decimal::zero)
                .non_negative()
        };
        MarketReading {
            router_price: market.get_rate(&config.trading_pair),
            pool_price: self.fresh_pool_price(now, config.pool_price_max_age_sec()),
            wallet_base: balance(&reference.base),
            wallet_quote: balance(&reference.quote),
            refresh_satisfied,
        }
    }

    fn record_pool(
        &mut self,
        pool: Result<PoolInfo, MarketDataError>,
        mapper: &TokenOrderMapper,
        now: TimeMs,
    ) {
        match pool {
            Ok(info) => {
                let inverted =
                    mapper.inverted_for(Some(&info.base_token), Some(&info.quote_token), None);
                match info
                    .price
                    .is_positive()
                    .then(|| mapper.price_to_reference(info.price, inverted))
                    .flatten()
                {
                    Some(price) => {
                        debug!(%price, inverted, "pool price updated");
                        self.pool_price = Some((price, now));
                    }
                    None => self.warn_throttled(
                        "pool_price",
                        now,
                        &MarketDataError::InvalidResponse(format!("pool price {}", info.price)),
                    ),
                }
            }
            Err(e) => self.warn_throttled("pool_price", now, &e),
        }
    }

    fn fresh_pool_price(&self, now: TimeMs, max_age_sec: i64) -> Option<Decimal> {
        self.pool_price
            .filter(|(_, at)| !now.has_elapsed(*at, max_age_sec + 1))
            .map(|(price, _)| price)
    }

    fn warn_throttled(&mut self, key: &'static str, now: TimeMs, err: &MarketDataError) {
        if self.throttle.allow(key, now) {
            warn!(source = key, error = %err, "market data unavailable");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TokenPair;
    use crate::market::MockMarketData;

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

    fn mapper() -> TokenOrderMapper {
        TokenOrderMapper::new(TokenPair::new("SOL", "USDC"), TokenPair::new("SOL", "USDC")).unwrap()
    }

    #[tokio::test]
    async fn test_balances_refreshed_on_interval() {
        let market = MockMarketData::new()
            .with_time(TimeMs::from_secs(0))
            .with_balance("router", "SOL", d("2"))
            .with_balance("router", "USDC", d("300"));
        let config = config();
        let ctx = ControllerContext::new();
        let mut cache = MarketCache::new(60);

        let reading = cache
            .refresh(&market, &config, &mapper(), &ctx, TimeMs::from_secs(0))
            .await;
        assert_eq!(reading.wallet_base, d("2"));
        assert_eq!(reading.wallet_quote, d("300"));
        assert_eq!(market.balance_update_count(), 1);

        cache
            .refresh(&market, &config, &mapper(), &ctx, TimeMs::from_secs(10))
            .await;
        assert_eq!(market.balance_update_count(), 1);

        cache
            .refresh(&market, &config, &mapper(), &ctx, TimeMs::from_secs(20))
            .await;
        assert_eq!(market.balance_update_count(), 2);
    }

    #[tokio::test]
    async fn test_refresh_request_forces_update_and_is_satisfied() {
        let market = MockMarketData::new();
        let config = config();
        let mut ctx = ControllerContext::new();
        let mut cache = MarketCache::new(60);
        cache
            .refresh(&market, &config, &mapper(), &ctx, TimeMs::from_secs(0))
            .await;

        ctx.request_balance_refresh(TimeMs::from_secs(5));
        let reading = cache
            .refresh(&market, &config, &mapper(), &ctx, TimeMs::from_secs(5))
            .await;
        assert_eq!(market.balance_update_count(), 2);
        assert!(reading.refresh_satisfied);

        market.fail_balance_updates(true);
        let reading = cache
            .refresh(&market, &config, &mapper(), &ctx, TimeMs::from_secs(6))
            .await;
        assert!(!reading.refresh_satisfied);
    }

    #[tokio::test]
    async fn test_inverted_pool_price_and_expiry() {
        let market = MockMarketData::new()
            .with_pool("USDC", "SOL", d("0.01"))
            .with_rate("SOL-USDC", d("99"));
        let config = config();
        let ctx = ControllerContext::new();
        let mut cache = MarketCache::new(60);

        let reading = cache
            .refresh(&market, &config, &mapper(), &ctx, TimeMs::from_secs(0))
            .await;
        assert_eq!(reading.pool_price, Some(d("100")));
        assert_eq!(reading.current_price(), Some(d("100")));

        market.fail_pool_lookups(true);
        let reading = cache
            .refresh(&market, &config, &mapper(), &ctx, TimeMs::from_secs(60))
            .await;
        assert_eq!(reading.current_price(), Some(d("100")));

        let reading = cache
            .refresh(&market, &config, &mapper(), &ctx, TimeMs::from_secs(61))
            .await;
        assert_eq!(reading.pool_price, None);
        assert_eq!(reading.current_price(), Some(d("99")));
    }
}
