//! Lossless decimal numeric type backed by rust_decimal.
//!
//! Every amount, price and percentage in the controller flows through this type.

use rust_decimal::Decimal as RustDecimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::str::FromStr;

/// Lossless decimal numeric type for money and price math.
///
/// Serializes to a JSON number (not string).
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Decimal(#[serde(with = "rust_decimal::serde::float")] RustDecimal);

impl Decimal {
    /// Create a Decimal from a RustDecimal.
    pub fn new(value: RustDecimal) -> Self {
        Decimal(value)
    }

    /// Parse a Decimal from a string losslessly.
    ///
    /// # Errors
    /// Returns an error if the string is not a valid decimal number.
    pub fn from_str_canonical(s: &str) -> Result<Self, rust_decimal::Error> {
        RustDecimal::from_str(s.trim()).map(Decimal)
    }

    /// Format the Decimal as a canonical string (no exponent notation).
    pub fn to_canonical_string(&self) -> String {
        format!("{}", self.0.normalize())
    }

    /// Get the underlying RustDecimal.
    pub fn inner(&self) -> RustDecimal {
        self.0
    }

    pub fn zero() -> Self {
        Decimal(RustDecimal::ZERO)
    }

    pub fn one() -> Self {
        Decimal(RustDecimal::ONE)
    }

    pub fn hundred() -> Self {
        Decimal(RustDecimal::ONE_HUNDRED)
    }

    pub fn from_i64(value: i64) -> Self {
        Decimal(RustDecimal::from(value))
    }

    /// Returns true if the value is exactly zero.
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// Returns true if the value is > 0.
    pub fn is_positive(&self) -> bool {
        !self.is_zero() && self.0.is_sign_positive()
    }

    /// Returns true if the value is < 0.
    pub fn is_negative(&self) -> bool {
        !self.is_zero() && self.0.is_sign_negative()
    }

    pub fn abs(&self) -> Self {
        Decimal(self.0.abs())
    }

    /// Negative values become zero.
    pub fn non_negative(self) -> Self {
        self.max(Decimal::zero())
    }

    /// Division that yields `None` for a zero divisor or on overflow.
    pub fn checked_div(self, rhs: Decimal) -> Option<Decimal> {
        self.0.checked_div(rhs.0).map(Decimal)
    }

    pub fn checked_mul(self, rhs: Decimal) -> Option<Decimal> {
        self.0.checked_mul(rhs.0).map(Decimal)
    }

    pub fn checked_add(self, rhs: Decimal) -> Option<Decimal> {
        self.0.checked_add(rhs.0).map(Decimal)
    }

    /// Reciprocal (`1 / self`), `None` for zero.
    pub fn recip(self) -> Option<Decimal> {
        Decimal::one().checked_div(self)
    }

    /// Interpret `self` as a percentage and return the fraction (`2` -> `0.02`).
    pub fn percent_to_fraction(self) -> Decimal {
        Decimal(self.0 / RustDecimal::ONE_HUNDRED)
    }
}

impl fmt::Display for Decimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_canonical_string())
    }
}

impl FromStr for Decimal {
    type Err = rust_decimal::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_str_canonical(s)
    }
}

impl From<RustDecimal> for Decimal {
    fn from(value: RustDecimal) -> Self {
        Decimal(value)
    }
}

impl From<Decimal> for RustDecimal {
    fn from(value: Decimal) -> Self {
        value.0
    }
}

impl From<i64> for Decimal {
    fn from(value: i64) -> Self {
        Decimal::from_i64(value)
    }
}

impl std::ops::Add for Decimal {
    type Output = Decimal;

    fn add(self, rhs: Decimal) -> Decimal {
        Decimal(self.0 + rhs.0)
    }
}

impl std::ops::AddAssign for Decimal {
    fn add_assign(&mut self, rhs: Decimal) {
        self.0 += rhs.0;
    }
}

impl std::ops::Sub for Decimal {
    type Output = Decimal;

    fn sub(self, rhs: Decimal) -> Decimal {
        Decimal(self.0 - rhs.0)
    }
}

impl std::ops::Mul for Decimal {
    type Output = Decimal;

    fn mul(self, rhs: Decimal) -> Decimal {
        Decimal(self.0 * rhs.0)
    }
}

/// Panics on a zero divisor; use [`Decimal::checked_div`] for runtime values.
impl std::ops::Div for Decimal {
    type Output = Decimal;

    fn div(self, rhs: Decimal) -> Decimal {
        Decimal(self.0 / rhs.0)
    }
}

impl std::ops::Neg for Decimal {
    type Output = Decimal;

    fn neg(self) -> Decimal {
        Decimal(-self.0)
    }
}

impl Sum for Decimal {
    fn sum<I: Iterator<Item = Decimal>>(iter: I) -> Self {
        iter.fold(Decimal::zero(), |acc, v| acc + v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> Decimal {
        Decimal::from_str_canonical(s).unwrap()
    }

    #[test]
    fn test_decimal_parse_trims_whitespace() {
        assert_eq!(d(" 12.5 "), d("12.5"));
        assert!(Decimal::from_str_canonical("abc").is_err());
    }

    #[test]
    fn test_decimal_canonical_drops_trailing_zeros() {
        assert_eq!(d("100.500").to_canonical_string(), "100.5");
        assert_eq!(d("123").to_canonical_string(), "123");
    }

    #[test]
    fn test_decimal_checked_div_by_zero() {
        assert_eq!(d("10").checked_div(Decimal::zero()), None);
        assert_eq!(d("10").checked_div(d("4")), Some(d("2.5")));
    }

    #[test]
    fn test_decimal_checked_mul_add_overflow() {
        let huge = Decimal::new(RustDecimal::MAX);
        assert_eq!(huge.checked_mul(d("2")), None);
        assert_eq!(huge.checked_add(huge), None);
        assert_eq!(d("1.5").checked_mul(d("4")), Some(d("6")));
        assert_eq!(d("1.5").checked_add(d("4")), Some(d("5.5")));
    }

    #[test]
    fn test_decimal_recip() {
        assert_eq!(d("4").recip(), Some(d("0.25")));
        assert_eq!(Decimal::zero().recip(), None);
    }

    #[test]
    fn test_decimal_percent_to_fraction() {
        assert_eq!(d("2").percent_to_fraction(), d("0.02"));
        assert_eq!(d("12").percent_to_fraction(), d("0.12"));
    }

    #[test]
    fn test_decimal_non_negative() {
        assert_eq!(d("-3").non_negative(), Decimal::zero());
        assert_eq!(d("3").non_negative(), d("3"));
    }

    #[test]
    fn test_decimal_sign_helpers() {
        assert!(d("0.0001").is_positive());
        assert!(d("-0.0001").is_negative());
        assert!(!Decimal::zero().is_positive());
        assert!(!Decimal::zero().is_negative());
    }

    #[test]
    fn test_decimal_sum() {
        let total: Decimal = vec![d("1.5"), d("2.5"), d("-1")].into_iter().sum();
        assert_eq!(total, d("3"));
    }

    #[test]
    fn test_decimal_json_serialization() {
        let json = serde_json::to_value(d("123.456")).unwrap();
        assert!(json.is_number());
        assert_eq!(json.to_string(), "123.456");
    }
}
