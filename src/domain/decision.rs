//! Intent, reasons and the per-tick decision record.

use super::{Command, DecisionPatch};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Category of action the engine is pursuing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Flow {
    None,
    Entry,
    Rebalance,
    #[serde(rename = "STOPLOSS")]
    StopLoss,
    Manual,
    Failure,
}

/// Execution phase within a flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stage {
    None,
    Wait,
    SubmitSwap,
    SubmitLp,
    StopLp,
}

/// Closed set of reasons attached to an intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reason {
    Idle,
    LpActive,
    ManualKillSwitch,
    RetriesExceeded,
    ExecutorFailed,
    ConcurrentSwaps,
    ConcurrentPositions,
    BalanceSyncTimeout,
    CommandInFlight,
    InventoryInProgress,
    LiquidateInProgress,
    SwapInProgress,
    StopLossTriggered,
    OutOfRangeRebalance,
    Cooldown,
    StopLossLiquidation,
    LiquidationCooldown,
    StopLossNoLiquidation,
    StopLossLiquidationDust,
    LiquidationAttemptsExhausted,
    ReopenWait,
    RebalanceOpen,
    RebalanceInventory,
    EntryOpen,
    EntryInventory,
    EntryNotTriggered,
    ReenterDisabled,
    WaitBalanceRefresh,
    PriceUnavailable,
    BudgetUnavailable,
    InsufficientBalance,
    SwapRequired,
    SwapCooldown,
    ReservationDenied,
}

impl Reason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Reason::Idle => "idle",
            Reason::LpActive => "lp_active",
            Reason::ManualKillSwitch => "manual_kill_switch",
            Reason::RetriesExceeded => "retries_exceeded",
            Reason::ExecutorFailed => "executor_failed",
            Reason::ConcurrentSwaps => "concurrent_swaps",
            Reason::ConcurrentPositions => "concurrent_positions",
            Reason::BalanceSyncTimeout => "balance_sync_timeout",
            Reason::CommandInFlight => "command_in_flight",
            Reason::InventoryInProgress => "inventory_in_progress",
            Reason::LiquidateInProgress => "liquidate_in_progress",
            Reason::SwapInProgress => "swap_in_progress",
            Reason::StopLossTriggered => "stop_loss_triggered",
            Reason::OutOfRangeRebalance => "out_of_range_rebalance",
            Reason::Cooldown => "cooldown",
            Reason::StopLossLiquidation => "stop_loss_liquidation",
            Reason::LiquidationCooldown => "liquidation_cooldown",
            Reason::StopLossNoLiquidation => "stop_loss_no_liquidation",
            Reason::StopLossLiquidationDust => "stop_loss_liquidation_dust",
            Reason::LiquidationAttemptsExhausted => "liquidation_attempts_exhausted",
            Reason::ReopenWait => "reopen_wait",
            Reason::RebalanceOpen => "rebalance_open",
            Reason::RebalanceInventory => "rebalance_inventory",
            Reason::EntryOpen => "entry_open",
            Reason::EntryInventory => "entry_inventory",
            Reason::EntryNotTriggered => "entry_not_triggered",
            Reason::ReenterDisabled => "reenter_disabled",
            Reason::WaitBalanceRefresh => "wait_balance_refresh",
            Reason::PriceUnavailable => "price_unavailable",
            Reason::BudgetUnavailable => "budget_unavailable",
            Reason::InsufficientBalance => "insufficient_balance",
            Reason::SwapRequired => "swap_required",
            Reason::SwapCooldown => "swap_cooldown",
            Reason::ReservationDenied => "reservation_denied",
        }
    }

    /// Reasons caused by configuration or external limits rather than market state.
    pub fn is_config_boundary(&self) -> bool {
        matches!(self, Reason::SwapRequired | Reason::ReservationDenied)
    }
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stage and reason shared by every intent variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    pub stage: Stage,
    pub reason: Reason,
}

/// Why the engine is doing what it is doing this tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "flow", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Intent {
    None(Step),
    Entry(Step),
    Rebalance(Step),
    #[serde(rename = "STOPLOSS")]
    StopLoss(Step),
    Manual(Step),
    Failure(Step),
}

impl Intent {
    pub fn new(flow: Flow, stage: Stage, reason: Reason) -> Self {
        let step = Step { stage, reason };
        match flow {
            Flow::None => Intent::None(step),
            Flow::Entry => Intent::Entry(step),
            Flow::Rebalance => Intent::Rebalance(step),
            Flow::StopLoss => Intent::StopLoss(step),
            Flow::Manual => Intent::Manual(step),
            Flow::Failure => Intent::Failure(step),
        }
    }

    pub fn wait(flow: Flow, reason: Reason) -> Self {
        Intent::new(flow, Stage::Wait, reason)
    }

    pub fn idle() -> Self {
        Intent::new(Flow::None, Stage::None, Reason::Idle)
    }

    pub fn flow(&self) -> Flow {
        match self {
            Intent::None(_) => Flow::None,
            Intent::Entry(_) => Flow::Entry,
            Intent::Rebalance(_) => Flow::Rebalance,
            Intent::StopLoss(_) => Flow::StopLoss,
            Intent::Manual(_) => Flow::Manual,
            Intent::Failure(_) => Flow::Failure,
        }
    }

    pub fn step(&self) -> &Step {
        match self {
            Intent::None(s)
            | Intent::Entry(s)
            | Intent::Rebalance(s)
            | Intent::StopLoss(s)
            | Intent::Manual(s)
            | Intent::Failure(s) => s,
        }
    }

    pub fn stage(&self) -> Stage {
        self.step().stage
    }

    pub fn reason(&self) -> Reason {
        self.step().reason
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}/{:?}/{}", self.flow(), self.stage(), self.reason())
    }
}

/// Topic of an optional log record attached to a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogTopic {
    CostFilter,
    Entry,
    StopLoss,
    Liquidation,
    Failure,
}

/// Diagnostic detail the host may log. Never feeds back into decisions.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecisionLog {
    pub topic: LogTopic,
    pub summary: String,
    pub details: BTreeMap<&'static str, String>,
}

impl DecisionLog {
    pub fn new(topic: LogTopic, summary: impl Into<String>) -> Self {
        DecisionLog {
            topic,
            summary: summary.into(),
            details: BTreeMap::new(),
        }
    }

    pub fn with(mut self, key: &'static str, value: impl fmt::Display) -> Self {
        self.details.insert(key, value.to_string());
        self
    }

    /// `key=value` pairs joined by spaces.
    pub fn render_details(&self) -> String {
        self.details
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// The engine's single output per tick.
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub intent: Intent,
    pub commands: Vec<Command>,
    pub log: Option<DecisionLog>,
    pub patch: DecisionPatch,
}

impl Decision {
    pub fn new(intent: Intent) -> Self {
        Decision {
            intent,
            commands: Vec::new(),
            log: None,
            patch: DecisionPatch::default(),
        }
    }

    pub fn wait(flow: Flow, reason: Reason) -> Self {
        Decision::new(Intent::wait(flow, reason))
    }

    pub fn with_commands(mut self, commands: Vec<Command>) -> Self {
        self.commands = commands;
        self
    }

    pub fn with_command(mut self, command: Command) -> Self {
        self.commands.push(command);
        self
    }

    pub fn with_patch(mut self, patch: DecisionPatch) -> Self {
        self.patch = patch;
        self
    }

    pub fn with_log(mut self, log: DecisionLog) -> Self {
        self.log = Some(log);
        self
    }
}
