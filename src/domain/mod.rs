//! Domain types for the guarded LP controller.
//!
//! This module provides:
//! - Lossless numeric handling via the Decimal wrapper
//! - Primitives: TimeMs, TokenPair, TradeSide
//! - Token-order translation between reference and pool order
//! - Per-tick views, the persistent context and its patch
//! - Intents, decisions and outgoing commands

pub mod command;
pub mod context;
pub mod decimal;
pub mod decision;
pub mod primitives;
pub mod token_order;
pub mod views;

pub use command::{command_id, Command, OpenPositionCommand, StopCommand, SwapCommand};
pub use context::{
    BudgetAnchor, ControllerContext, DecisionPatch, FailureContext, FeeEstimatorContext,
    LpContext, RebalanceContext, RebalancePlan, StopLossContext, SwapContext,
};
pub use decimal::Decimal;
pub use decision::{Decision, DecisionLog, Flow, Intent, LogTopic, Reason, Stage, Step};
pub use primitives::{TimeMs, TokenPair, TradeSide};
pub use token_order::TokenOrderMapper;
pub use views::{CloseType, LPView, LpSide, LpState, Snapshot, SwapPurpose, SwapView};
