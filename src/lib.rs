pub mod config;
pub mod controller;
pub mod domain;
pub mod engine;
pub mod error;
pub mod market;
pub mod telemetry;

pub use config::{ConfigError, ControllerConfig, LiquidationMode};
pub use controller::{Controller, ControllerStatus, ExecutorInfo, ExecutorKind, TickOutcome};
pub use domain::{
    Command, ControllerContext, Decimal, Decision, DecisionPatch, Flow, Intent, Reason, Snapshot,
    Stage, TimeMs, TokenPair,
};
pub use engine::{ControllerState, DecisionEngine, DecisionPolicy};
pub use error::ControllerError;
pub use market::{
    FixedBudgetPool, MarketDataError, MarketDataProvider, MockMarketData, PoolInfo,
    ReservationPool, ReservationRequest,
};
