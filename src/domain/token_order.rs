//! Translation between the controller's reference token order and the pool's native order.
//!
//! A pool may list the pair reversed (`USDC-SOL` for a `SOL-USDC` controller). Reading
//! from the pool swaps amounts and takes reciprocals of prices, flipping bound order.
//! Writing to the pool applies the same transform again, which makes it self-inverse.

use super::{Decimal, LpSide, TokenPair};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenOrderMapper {
    reference: TokenPair,
    pool: TokenPair,
    pool_inverted: bool,
}

impl TokenOrderMapper {
    /// Returns `None` when the two pairs do not name the same tokens.
    pub fn new(reference: TokenPair, pool: TokenPair) -> Option<Self> {
        if !reference.same_tokens(&pool) {
            return None;
        }
        let pool_inverted = reference != pool;
        Some(TokenOrderMapper {
            reference,
            pool,
            pool_inverted,
        })
    }

    pub fn reference(&self) -> &TokenPair {
        &self.reference
    }

    pub fn pool_pair(&self) -> &TokenPair {
        &self.pool
    }

    pub fn pool_inverted(&self) -> bool {
        self.pool_inverted
    }

    /// Whether a counterparty reporting these tokens uses the reversed order.
    ///
    /// Explicit tokens win over a pair string. Anything unrecognized falls back to the
    /// configured pool order.
    pub fn inverted_for(
        &self,
        base_token: Option<&str>,
        quote_token: Option<&str>,
        trading_pair: Option<&str>,
    ) -> bool {
        let reported = match (base_token, quote_token) {
            (Some(base), Some(quote)) => Some(TokenPair::new(base, quote)),
            _ => trading_pair.and_then(TokenPair::parse),
        };
        match reported {
            Some(pair) if pair == self.reference => false,
            Some(pair) if pair == self.reference.reversed() => true,
            _ => self.pool_inverted,
        }
    }

    /// `(base, quote)` reported in some order, returned in reference order.
    pub fn amounts_to_reference(
        &self,
        base: Decimal,
        quote: Decimal,
        inverted: bool,
    ) -> (Decimal, Decimal) {
        if inverted {
            (quote, base)
        } else {
            (base, quote)
        }
    }

    /// Reference-order `(base, quote)` in pool order.
    pub fn amounts_to_pool(&self, base: Decimal, quote: Decimal) -> (Decimal, Decimal) {
        self.amounts_to_reference(base, quote, self.pool_inverted)
    }

    /// `None` only for a zero price in the inverted case.
    pub fn price_to_reference(&self, price: Decimal, inverted: bool) -> Option<Decimal> {
        if inverted {
            price.recip()
        } else {
            Some(price)
        }
    }

    pub fn price_to_pool(&self, price: Decimal) -> Option<Decimal> {
        self.price_to_reference(price, self.pool_inverted)
    }

    /// Bounds keep `lower <= upper` after inversion.
    pub fn bounds_to_reference(
        &self,
        lower: Decimal,
        upper: Decimal,
        inverted: bool,
    ) -> Option<(Decimal, Decimal)> {
        if inverted {
            Some((upper.recip()?, lower.recip()?))
        } else {
            Some((lower, upper))
        }
    }

    pub fn bounds_to_pool(&self, lower: Decimal, upper: Decimal) -> Option<(Decimal, Decimal)> {
        self.bounds_to_reference(lower, upper, self.pool_inverted)
    }

    pub fn side_to_reference(&self, side: LpSide, inverted: bool) -> LpSide {
        if inverted {
            side.flipped()
        } else {
            side
        }
    }

    pub fn side_to_pool(&self, side: LpSide) -> LpSide {
        self.side_to_reference(side, self.pool_inverted)
    }
}
