//! In-memory market data for tests and dry runs.

use super::{MarketDataError, MarketDataProvider, PoolInfo};
use crate::domain::{Decimal, TimeMs};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Debug, Default)]
struct MockState {
    now: TimeMs,
    rates: HashMap<String, Decimal>,
    balances: HashMap<(String, String), Decimal>,
    /// Balances set while deferred; visible after the next successful update.
    staged: HashMap<(String, String), Decimal>,
    defer_balances: bool,
    pool: Option<PoolInfo>,
    fail_balances: bool,
    fail_pool: bool,
    balance_updates: usize,
}

/// Mock provider with settable time, rates, balances and failures.
///
/// State sits behind a `Mutex` so tests can change it between ticks
/// while the controller holds an `Arc`.
#[derive(Debug, Default)]
pub struct MockMarketData {
    state: Mutex<MockState>,
}

impl MockMarketData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_time(self, now: TimeMs) -> Self {
        self.set_time(now);
        self
    }

    pub fn with_rate(self, pair: &str, rate: Decimal) -> Self {
        self.set_rate(pair, rate);
        self
    }

    pub fn with_balance(self, connector: &str, token: &str, amount: Decimal) -> Self {
        self.set_balance(connector, token, amount);
        self
    }

    /// Make `set_balance` behave like a connector cache: new balances show
    /// up only after a successful `update_balances`.
    pub fn with_deferred_balances(self) -> Self {
        self.with_state(|s| s.defer_balances = true);
        self
    }

    pub fn with_pool(self, base_token: &str, quote_token: &str, price: Decimal) -> Self {
        self.set_pool(base_token, quote_token, price);
        self
    }

    pub fn set_time(&self, now: TimeMs) {
        self.with_state(|s| s.now = now);
    }

    pub fn advance_secs(&self, secs: i64) {
        self.with_state(|s| s.now = s.now.plus_secs(secs));
    }

    pub fn set_rate(&self, pair: &str, rate: Decimal) {
        self.with_state(|s| {
            s.rates.insert(pair.to_string(), rate);
        });
    }

    pub fn clear_rate(&self, pair: &str) {
        self.with_state(|s| {
            s.rates.remove(pair);
        });
    }

    pub fn set_balance(&self, connector: &str, token: &str, amount: Decimal) {
        self.with_state(|s| {
            let key = (connector.to_string(), token.to_string());
            if s.defer_balances {
                s.staged.insert(key, amount);
            } else {
                s.balances.insert(key, amount);
            }
        });
    }

    pub fn set_pool(&self, base_token: &str, quote_token: &str, price: Decimal) {
        self.with_state(|s| {
            s.pool = Some(PoolInfo {
                base_token: base_token.to_string(),
                quote_token: quote_token.to_string(),
                price,
            })
        });
    }

    pub fn fail_balance_updates(&self, fail: bool) {
        self.with_state(|s| s.fail_balances = fail);
    }

    pub fn fail_pool_lookups(&self, fail: bool) {
        self.with_state(|s| s.fail_pool = fail);
    }

    /// Number of `update_balances` calls that reached the mock.
    pub fn balance_update_count(&self) -> usize {
        self.with_state(|s| s.balance_updates)
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut MockState) -> R) -> R {
        let mut guard = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }
}

#[async_trait]
impl MarketDataProvider for MockMarketData {
    fn time(&self) -> TimeMs {
        self.with_state(|s| s.now)
    }

    fn get_rate(&self, trading_pair: &str) -> Option<Decimal> {
        self.with_state(|s| s.rates.get(trading_pair).copied())
    }

    async fn update_balances(&self, connector: &str) -> Result<(), MarketDataError> {
        self.with_state(|s| {
            s.balance_updates += 1;
            if s.fail_balances {
                Err(MarketDataError::Unavailable(format!(
                    "{} balance refresh failed",
                    connector
                )))
            } else {
                let staged: Vec<_> = s.staged.drain().collect();
                s.balances.extend(staged);
                Ok(())
            }
        })
    }

    fn get_balance(&self, connector: &str, token: &str) -> Option<Decimal> {
        self.with_state(|s| {
            s.balances
                .get(&(connector.to_string(), token.to_string()))
                .copied()
        })
    }

    async fn pool_info(
        &self,
        _connector: &str,
        pool_address: &str,
    ) -> Result<PoolInfo, MarketDataError> {
        self.with_state(|s| {
            if s.fail_pool {
                return Err(MarketDataError::Unavailable("pool lookup failed".to_string()));
            }
            s.pool
                .clone()
                .ok_or_else(|| MarketDataError::UnknownPool(pool_address.to_string()))
        })
    }
}
