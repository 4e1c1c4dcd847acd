//! Read-only per-tick projections of executors, and the snapshot that bundles them.

use super::{Decimal, TimeMs};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Lifecycle state reported by an LP position executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LpState {
    Opening,
    InRange,
    OutOfRange,
    Closing,
    Complete,
    RetriesExceeded,
    NotActive,
}

impl LpState {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "OPENING" => Some(LpState::Opening),
            "IN_RANGE" => Some(LpState::InRange),
            "OUT_OF_RANGE" => Some(LpState::OutOfRange),
            "CLOSING" => Some(LpState::Closing),
            "COMPLETE" => Some(LpState::Complete),
            "RETRIES_EXCEEDED" => Some(LpState::RetriesExceeded),
            "NOT_ACTIVE" => Some(LpState::NotActive),
            _ => None,
        }
    }
}

/// How an executor finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CloseType {
    Completed,
    Failed,
    EarlyStop,
    StopLoss,
    TakeProfit,
    TimeLimit,
    TrailingStop,
    PositionHold,
}

/// Which side(s) of the pair an LP position is funded with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LpSide {
    Both,
    Quote,
    Base,
}

impl LpSide {
    /// Side implied by non-zero amounts. Empty amounts count as base-only.
    pub fn from_amounts(base: Decimal, quote: Decimal) -> Self {
        match (base.is_positive(), quote.is_positive()) {
            (true, true) => LpSide::Both,
            (false, true) => LpSide::Quote,
            _ => LpSide::Base,
        }
    }

    /// Accepts names or the numeric codes 0/1/2.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "both" | "0" => Some(LpSide::Both),
            "quote" | "1" => Some(LpSide::Quote),
            "base" | "2" => Some(LpSide::Base),
            _ => None,
        }
    }

    pub fn code(&self) -> u8 {
        match self {
            LpSide::Both => 0,
            LpSide::Quote => 1,
            LpSide::Base => 2,
        }
    }

    pub fn flipped(&self) -> Self {
        match self {
            LpSide::Both => LpSide::Both,
            LpSide::Quote => LpSide::Base,
            LpSide::Base => LpSide::Quote,
        }
    }
}

/// Purpose label carried by a swap command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SwapPurpose {
    Inventory,
    #[serde(rename = "liquidate")]
    Liquidation,
}

impl SwapPurpose {
    pub fn label(&self) -> &'static str {
        match self {
            SwapPurpose::Inventory => "inventory",
            SwapPurpose::Liquidation => "liquidate",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "inventory" | "auto_swap" => Some(SwapPurpose::Inventory),
            "liquidate" | "stoploss" => Some(SwapPurpose::Liquidation),
            _ => None,
        }
    }
}

/// One LP position, already normalized into reference token order.
#[derive(Debug, Clone, PartialEq)]
pub struct LPView {
    pub id: String,
    pub is_active: bool,
    pub is_done: bool,
    pub close_type: Option<CloseType>,
    pub state: Option<LpState>,
    pub position_address: Option<String>,
    pub side: Option<LpSide>,
    pub base_amount: Decimal,
    pub quote_amount: Decimal,
    pub base_fee: Decimal,
    pub quote_fee: Decimal,
    pub lower_price: Option<Decimal>,
    pub upper_price: Option<Decimal>,
    pub current_price: Option<Decimal>,
    pub out_of_range_since: Option<TimeMs>,
}

impl LPView {
    /// Empty view for an executor with no reported details yet.
    pub fn new(id: impl Into<String>) -> Self {
        LPView {
            id: id.into(),
            is_active: false,
            is_done: false,
            close_type: None,
            state: None,
            position_address: None,
            side: None,
            base_amount: Decimal::zero(),
            quote_amount: Decimal::zero(),
            base_fee: Decimal::zero(),
            quote_fee: Decimal::zero(),
            lower_price: None,
            upper_price: None,
            current_price: None,
            out_of_range_since: None,
        }
    }

    /// Opening or closing: amounts and bounds are not reliable.
    pub fn in_transition(&self) -> bool {
        matches!(self.state, Some(LpState::Opening) | Some(LpState::Closing))
    }

    pub fn is_closing(&self) -> bool {
        self.state == Some(LpState::Closing)
    }

    /// Principal plus accrued fees, valued at `price`. `None` on overflow.
    pub fn value_at(&self, price: Decimal) -> Option<Decimal> {
        self.base_amount
            .checked_add(self.base_fee)?
            .checked_mul(price)?
            .checked_add(self.quote_amount)?
            .checked_add(self.quote_fee)
    }

    /// Pending fees only, valued at `price`.
    pub fn pending_fee_value(&self, price: Decimal) -> Option<Decimal> {
        self.base_fee.checked_mul(price)?.checked_add(self.quote_fee)
    }

    /// Lower and upper bounds when both are known and positive.
    pub fn bounds(&self) -> Option<(Decimal, Decimal)> {
        match (self.lower_price, self.upper_price) {
            (Some(lo), Some(hi)) if lo.is_positive() && hi.is_positive() => Some((lo, hi)),
            _ => None,
        }
    }
}

/// One inventory or liquidation swap command.
#[derive(Debug, Clone, PartialEq)]
pub struct SwapView {
    pub id: String,
    pub is_active: bool,
    pub is_done: bool,
    pub close_type: Option<CloseType>,
    pub purpose: Option<SwapPurpose>,
    pub amount: Decimal,
    /// Base actually filled, when the executor reports it.
    pub executed_base: Option<Decimal>,
}

impl SwapView {
    pub fn new(id: impl Into<String>, purpose: Option<SwapPurpose>) -> Self {
        SwapView {
            id: id.into(),
            is_active: false,
            is_done: false,
            close_type: None,
            purpose,
            amount: Decimal::zero(),
            executed_base: None,
        }
    }

    pub fn label(&self) -> &'static str {
        self.purpose.map(|p| p.label()).unwrap_or("swap")
    }

    pub fn completed(&self) -> bool {
        self.is_done && self.close_type == Some(CloseType::Completed)
    }

    /// Base sold by a sell swap: the executed fill, else the requested amount.
    pub fn sold_base(&self) -> Decimal {
        self.executed_base
            .filter(|base| base.is_positive())
            .unwrap_or(self.amount)
            .non_negative()
    }
}

/// Everything the engine sees for one tick. Rebuilt from scratch every tick.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Snapshot {
    pub now: TimeMs,
    pub current_price: Option<Decimal>,
    pub router_price: Option<Decimal>,
    pub pool_price: Option<Decimal>,
    pub wallet_base: Decimal,
    pub wallet_quote: Decimal,
    pub lp: BTreeMap<String, LPView>,
    pub swaps: BTreeMap<String, SwapView>,
}

impl Snapshot {
    /// Current price if known and strictly positive.
    pub fn valid_price(&self) -> Option<Decimal> {
        self.current_price.filter(|p| p.is_positive())
    }

    pub fn active_lp(&self) -> impl Iterator<Item = &LPView> {
        self.lp.values().filter(|v| v.is_active)
    }

    pub fn active_swaps(&self) -> impl Iterator<Item = &SwapView> {
        self.swaps.values().filter(|v| v.is_active)
    }

    pub fn has_active_lp(&self) -> bool {
        self.active_lp().next().is_some()
    }

    pub fn wallet_value(&self, price: Decimal) -> Option<Decimal> {
        self.wallet_base.checked_mul(price)?.checked_add(self.wallet_quote)
    }

    /// True if any executor, live or finished, carries this id.
    pub fn knows(&self, id: &str) -> bool {
        self.lp.contains_key(id) || self.swaps.contains_key(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> Decimal {
        Decimal::from_str_canonical(s).unwrap()
    }

    #[test]
    fn test_side_from_amounts() {
        assert_eq!(LpSide::from_amounts(d("1"), d("1")), LpSide::Both);
        assert_eq!(LpSide::from_amounts(d("0"), d("1")), LpSide::Quote);
        assert_eq!(LpSide::from_amounts(d("1"), d("0")), LpSide::Base);
        assert_eq!(LpSide::from_amounts(d("0"), d("0")), LpSide::Base);
    }

    #[test]
    fn test_side_parse_accepts_codes() {
        assert_eq!(LpSide::parse("1"), Some(LpSide::Quote));
        assert_eq!(LpSide::parse("BOTH"), Some(LpSide::Both));
        assert_eq!(LpSide::parse("left"), None);
    }

    #[test]
    fn test_lp_state_parse() {
        assert_eq!(LpState::parse("in_range"), Some(LpState::InRange));
        assert_eq!(LpState::parse("RETRIES_EXCEEDED"), Some(LpState::RetriesExceeded));
        assert_eq!(LpState::parse("weird"), None);
    }

    #[test]
    fn test_lp_view_value_includes_fees() {
        let mut view = LPView::new("lp-1");
        view.base_amount = d("2");
        view.base_fee = d("0.1");
        view.quote_amount = d("100");
        view.quote_fee = d("1");
        assert_eq!(view.value_at(d("50")), Some(d("206")));
        assert_eq!(view.pending_fee_value(d("50")), Some(d("6")));

        view.base_amount = d("10000000000000000000000000");
        assert_eq!(view.value_at(d("100000")), None);
    }

    #[test]
    fn test_transition_flag() {
        let mut view = LPView::new("lp-1");
        view.state = Some(LpState::Opening);
        assert!(view.in_transition());
        view.state = Some(LpState::OutOfRange);
        assert!(!view.in_transition());
    }

    #[test]
    fn test_swap_purpose_labels() {
        assert_eq!(SwapPurpose::Liquidation.label(), "liquidate");
        assert_eq!(SwapPurpose::parse("inventory"), Some(SwapPurpose::Inventory));
        assert_eq!(
            serde_json::to_string(&SwapPurpose::Liquidation).unwrap(),
            "\"liquidate\""
        );
    }

    #[test]
    fn test_snapshot_active_filters() {
        let mut snapshot = Snapshot::default();
        let mut live = LPView::new("a");
        live.is_active = true;
        snapshot.lp.insert("a".into(), live);
        snapshot.lp.insert("b".into(), LPView::new("b"));
        assert_eq!(snapshot.active_lp().count(), 1);
        assert!(snapshot.knows("b"));
        assert!(!snapshot.knows("c"));
    }
}
