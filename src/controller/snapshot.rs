//! Executor records from the host, and their projection into reference-order views.

use crate::domain::{
    CloseType, Decimal, LPView, LpSide, LpState, SwapPurpose, SwapView, TimeMs, TokenOrderMapper,
};
use rust_decimal::prelude::ToPrimitive;
use serde::Deserialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutorKind {
    Lp,
    Swap,
}

/// One executor as reported by the host.
///
/// `custom_info` carries executor-specific fields. Numbers may arrive as JSON
/// numbers or numeric strings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ExecutorInfo {
    pub id: String,
    pub kind: ExecutorKind,
    #[serde(default)]
    pub is_active: bool,
    #[serde(default)]
    pub is_done: bool,
    #[serde(default)]
    pub close_type: Option<CloseType>,
    #[serde(default)]
    pub custom_info: serde_json::Value,
}

impl ExecutorInfo {
    pub fn new(id: impl Into<String>, kind: ExecutorKind) -> Self {
        ExecutorInfo {
            id: id.into(),
            kind,
            is_active: false,
            is_done: false,
            close_type: None,
            custom_info: serde_json::Value::Null,
        }
    }

    fn text(&self, key: &str) -> Option<&str> {
        self.custom_info
            .get(key)
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    fn decimal(&self, key: &str) -> Option<Decimal> {
        self.custom_info.get(key).and_then(decimal_from_json)
    }
}

/// Lenient decimal read: numbers, numeric strings, scientific notation.
pub fn decimal_from_json(value: &serde_json::Value) -> Option<Decimal> {
    let raw = match value {
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                return Some(Decimal::from_i64(i));
            }
            n.to_string()
        }
        serde_json::Value::String(s) => s.trim().to_string(),
        _ => return None,
    };
    Decimal::from_str_canonical(&raw).ok().or_else(|| {
        rust_decimal::Decimal::from_scientific(&raw)
            .ok()
            .map(Decimal::new)
    })
}

/// Epoch seconds to millis. Out-of-range values are treated as absent.
fn secs_to_time(secs: Decimal) -> Option<TimeMs> {
    let ms = secs
        .checked_mul(Decimal::from_i64(1000))?
        .inner()
        .trunc()
        .to_i64()?;
    (ms > 0).then_some(TimeMs::new(ms))
}

/// Normalize one LP executor into reference order.
pub fn lp_view(mapper: &TokenOrderMapper, info: &ExecutorInfo) -> LPView {
    let inverted = mapper.inverted_for(
        info.text("base_token"),
        info.text("quote_token"),
        info.text("trading_pair"),
    );
    let zero = Decimal::zero;
    let (base_amount, quote_amount) = mapper.amounts_to_reference(
        info.decimal("base_amount").unwrap_or_else(zero),
        info.decimal("quote_amount").unwrap_or_else(zero),
        inverted,
    );
    let (base_fee, quote_fee) = mapper.amounts_to_reference(
        info.decimal("base_fee").unwrap_or_else(zero),
        info.decimal("quote_fee").unwrap_or_else(zero),
        inverted,
    );
    let (lower_price, upper_price) =
        match (info.decimal("lower_price"), info.decimal("upper_price")) {
            (Some(lo), Some(hi)) if lo.is_positive() && hi.is_positive() => {
                match mapper.bounds_to_reference(lo, hi, inverted) {
                    Some((lo, hi)) => (Some(lo), Some(hi)),
                    None => (None, None),
                }
            }
            _ => (None, None),
        };
    let current_price = info
        .decimal("current_price")
        .filter(|p| p.is_positive())
        .and_then(|p| mapper.price_to_reference(p, inverted));
    let side = info
        .custom_info
        .get("side")
        .and_then(|v| match v {
            serde_json::Value::Number(n) => LpSide::parse(&n.to_string()),
            serde_json::Value::String(s) => LpSide::parse(s),
            _ => None,
        })
        .map(|side| mapper.side_to_reference(side, inverted));

    LPView {
        id: info.id.clone(),
        is_active: info.is_active,
        is_done: info.is_done,
        close_type: info.close_type,
        state: info.text("state").and_then(LpState::parse),
        position_address: info.text("position_address").map(str::to_string),
        side,
        base_amount,
        quote_amount,
        base_fee,
        quote_fee,
        lower_price,
        upper_price,
        current_price,
        out_of_range_since: info.decimal("out_of_range_since").and_then(secs_to_time),
    }
}

pub fn swap_view(info: &ExecutorInfo) -> SwapView {
    let purpose = info
        .text("level_id")
        .and_then(SwapPurpose::parse)
        .or_else(|| info.text("purpose").and_then(SwapPurpose::parse));
    let mut view = SwapView::new(info.id.clone(), purpose);
    view.is_active = info.is_active;
    view.is_done = info.is_done;
    view.close_type = info.close_type;
    view.amount = info.decimal("amount").unwrap_or_else(Decimal::zero);
    view.executed_base = info.decimal("executed_amount_base");
    view
}

/// Split the executor list into LP and swap views keyed by id.
pub fn collect_views(
    mapper: &TokenOrderMapper,
    executors: &[ExecutorInfo],
) -> (BTreeMap<String, LPView>, BTreeMap<String, SwapView>) {
    let mut lp = BTreeMap::new();
    let mut swaps = BTreeMap::new();
    for info in executors {
        match info.kind {
            ExecutorKind::Lp => {
                lp.insert(info.id.clone(), lp_view(mapper, info));
            }
            ExecutorKind::Swap => {
                swaps.insert(info.id.clone(), swap_view(info));
            }
        }
    }
    (lp, swaps)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TokenPair;
    use serde_json::json;

    fn d(s: &str) -> Decimal {
        Decimal::from_str_canonical(s).unwrap()
    }

    fn mapper(pool: TokenPair) -> TokenOrderMapper {
        TokenOrderMapper::new(TokenPair::new("SOL", "USDC"), pool).unwrap()
    }

    fn lp_info(custom: serde_json::Value) -> ExecutorInfo {
        let mut info = ExecutorInfo::new("lp-1", ExecutorKind::Lp);
        info.is_active = true;
        info.custom_info = custom;
        info
    }

    #[test]
    fn test_lenient_decimal_parsing() {
        assert_eq!(decimal_from_json(&json!(5)), Some(d("5")));
        assert_eq!(decimal_from_json(&json!("1.25")), Some(d("1.25")));
        assert_eq!(decimal_from_json(&json!(" 2 ")), Some(d("2")));
        assert_eq!(decimal_from_json(&json!("1e-3")), Some(d("0.001")));
        assert_eq!(decimal_from_json(&json!("abc")), None);
        assert_eq!(decimal_from_json(&json!(null)), None);
        assert_eq!(decimal_from_json(&json!([1])), None);
    }

    #[test]
    fn test_lp_view_same_order() {
        let info = lp_info(json!({
            "state": "IN_RANGE",
            "position_address": "pos1",
            "side": 0,
            "base_amount": "2",
            "quote_amount": 300,
            "base_fee": "0.01",
            "quote_fee": "1.5",
            "lower_price": "90",
            "upper_price": "110",
            "current_price": "100",
            "out_of_range_since": 1700000000
        }));
        let view = lp_view(&mapper(TokenPair::new("SOL", "USDC")), &info);
        assert_eq!(view.state, Some(LpState::InRange));
        assert_eq!(view.position_address.as_deref(), Some("pos1"));
        assert_eq!(view.side, Some(LpSide::Both));
        assert_eq!(view.base_amount, d("2"));
        assert_eq!(view.quote_amount, d("300"));
        assert_eq!(view.bounds(), Some((d("90"), d("110"))));
        assert_eq!(view.out_of_range_since, Some(TimeMs::from_secs(1_700_000_000)));
    }

    #[test]
    fn test_lp_view_inverted_executor() {
        let info = lp_info(json!({
            "base_token": "USDC",
            "quote_token": "SOL",
            "side": "base",
            "base_amount": "300",
            "quote_amount": "2",
            "base_fee": "1.5",
            "quote_fee": "0.01",
            "lower_price": "0.008",
            "upper_price": "0.0125",
            "current_price": "0.01"
        }));
        let view = lp_view(&mapper(TokenPair::new("USDC", "SOL")), &info);
        assert_eq!(view.base_amount, d("2"));
        assert_eq!(view.quote_amount, d("300"));
        assert_eq!(view.base_fee, d("0.01"));
        assert_eq!(view.quote_fee, d("1.5"));
        assert_eq!(view.bounds(), Some((d("80"), d("125"))));
        assert_eq!(view.current_price, Some(d("100")));
        assert_eq!(view.side, Some(LpSide::Quote));
    }

    #[test]
    fn test_executor_tokens_override_pool_order() {
        // pool configured inverted, but this executor reports reference order
        let info = lp_info(json!({
            "trading_pair": "SOL-USDC",
            "base_amount": "2",
            "quote_amount": "300"
        }));
        let view = lp_view(&mapper(TokenPair::new("USDC", "SOL")), &info);
        assert_eq!(view.base_amount, d("2"));
        assert_eq!(view.quote_amount, d("300"));
    }

    #[test]
    fn test_garbled_fields_are_absent() {
        let info = lp_info(json!({
            "state": 7,
            "lower_price": "x",
            "upper_price": "110",
            "base_amount": {"nested": true}
        }));
        let view = lp_view(&mapper(TokenPair::new("SOL", "USDC")), &info);
        assert_eq!(view.state, None);
        assert_eq!(view.bounds(), None);
        assert_eq!(view.base_amount, Decimal::zero());
    }

    #[test]
    fn test_overflowing_fields_do_not_panic() {
        let info = lp_info(json!({
            "state": "OUT_OF_RANGE",
            "out_of_range_since": "1e28",
            "base_amount": "79228162514264337593543950335",
            "current_price": "1e20"
        }));
        let (lp, _) = collect_views(&mapper(TokenPair::new("SOL", "USDC")), &[info]);
        let view = &lp["lp-1"];
        assert_eq!(view.out_of_range_since, None);
        assert_eq!(view.value_at(d("1000")), None);

        // fits in a decimal but not in i64 millis
        let info = lp_info(json!({"out_of_range_since": "1e20"}));
        let view = lp_view(&mapper(TokenPair::new("SOL", "USDC")), &info);
        assert_eq!(view.out_of_range_since, None);
    }

    #[test]
    fn test_swap_purpose_from_level_id_or_purpose() {
        let mut info = ExecutorInfo::new("s1", ExecutorKind::Swap);
        info.custom_info = json!({
            "level_id": "liquidate",
            "amount": "1.5",
            "executed_amount_base": "1.2"
        });
        let view = swap_view(&info);
        assert_eq!(view.purpose, Some(SwapPurpose::Liquidation));
        assert_eq!(view.amount, d("1.5"));
        assert_eq!(view.sold_base(), d("1.2"));

        info.custom_info = json!({"purpose": "inventory"});
        assert_eq!(swap_view(&info).purpose, Some(SwapPurpose::Inventory));

        info.custom_info = json!({});
        assert_eq!(swap_view(&info).purpose, None);
    }

    #[test]
    fn test_executor_info_deserializes() {
        let info: ExecutorInfo = serde_json::from_value(json!({
            "id": "s1",
            "kind": "swap",
            "is_done": true,
            "close_type": "COMPLETED"
        }))
        .unwrap();
        assert_eq!(info.kind, ExecutorKind::Swap);
        assert_eq!(info.close_type, Some(CloseType::Completed));
        assert!(!info.is_active);
    }

    #[test]
    fn test_collect_views_splits_by_kind() {
        let executors = vec![
            lp_info(json!({})),
            ExecutorInfo::new("s1", ExecutorKind::Swap),
        ];
        let (lp, swaps) = collect_views(&mapper(TokenPair::new("SOL", "USDC")), &executors);
        assert!(lp.contains_key("lp-1"));
        assert!(swaps.contains_key("s1"));
    }
}
