//! Collaborator seams: market data and the shared reservation pool.

use crate::domain::{Decimal, TimeMs};
use async_trait::async_trait;
use std::fmt;

pub mod mock;
pub mod reservation;

pub use mock::MockMarketData;
pub use reservation::{FixedBudgetPool, ReservationPool, ReservationRequest};

/// Pool metadata in the pool's own token order.
#[derive(Debug, Clone, PartialEq)]
pub struct PoolInfo {
    pub base_token: String,
    pub quote_token: String,
    /// Quote per base, in pool order.
    pub price: Decimal,
}

/// Market data the controller consumes each tick.
///
/// Implementations wrap the host's connectors and rate oracle.
#[async_trait]
pub trait MarketDataProvider: Send + Sync + fmt::Debug {
    /// Current host time.
    fn time(&self) -> TimeMs;

    /// Reference (router) rate for a `BASE-QUOTE` pair, if known.
    fn get_rate(&self, trading_pair: &str) -> Option<Decimal>;

    /// Ask a connector to re-read wallet balances.
    ///
    /// # Arguments
    /// * `connector` - Connector name (e.g., "jupiter/router")
    async fn update_balances(&self, connector: &str) -> Result<(), MarketDataError>;

    /// Last known balance of `token` on `connector`.
    fn get_balance(&self, connector: &str, token: &str) -> Option<Decimal>;

    /// Fetch pool tokens and price.
    ///
    /// # Arguments
    /// * `connector` - CLMM connector name
    /// * `pool_address` - On-chain pool address
    async fn pool_info(&self, connector: &str, pool_address: &str)
        -> Result<PoolInfo, MarketDataError>;
}

/// Error type for market data operations.
#[derive(Debug, Clone, PartialEq)]
pub enum MarketDataError {
    /// Connector is not registered with the host
    UnknownConnector(String),
    /// Pool address not recognized by the connector
    UnknownPool(String),
    /// Transient failure (RPC timeout, gateway down)
    Unavailable(String),
    /// Response could not be interpreted
    InvalidResponse(String),
}

impl fmt::Display for MarketDataError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MarketDataError::UnknownConnector(name) => write!(f, "Unknown connector: {}", name),
            MarketDataError::UnknownPool(addr) => write!(f, "Unknown pool: {}", addr),
            MarketDataError::Unavailable(msg) => write!(f, "Unavailable: {}", msg),
            MarketDataError::InvalidResponse(msg) => write!(f, "Invalid response: {}", msg),
        }
    }
}

impl std::error::Error for MarketDataError {}
