//! Cross-controller budget reservation.

use crate::domain::Decimal;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Mutex;

/// What a controller wants to lock before opening a position.
#[derive(Debug, Clone, PartialEq)]
pub struct ReservationRequest {
    pub budget_key: String,
    pub connector: String,
    /// Token -> amount. Only strictly positive amounts are present.
    pub requirements: BTreeMap<String, Decimal>,
    pub native_token: Option<String>,
    pub min_native_balance: Decimal,
}

impl ReservationRequest {
    /// Drops non-positive amounts.
    pub fn new(
        budget_key: impl Into<String>,
        connector: impl Into<String>,
        amounts: impl IntoIterator<Item = (String, Decimal)>,
    ) -> Self {
        ReservationRequest {
            budget_key: budget_key.into(),
            connector: connector.into(),
            requirements: amounts
                .into_iter()
                .filter(|(_, amount)| amount.is_positive())
                .collect(),
            native_token: None,
            min_native_balance: Decimal::zero(),
        }
    }

    pub fn with_native_floor(mut self, token: Option<String>, min_balance: Decimal) -> Self {
        self.native_token = token;
        self.min_native_balance = min_balance;
        self
    }
}

/// Shared pool of funds, possibly used by several controllers at once.
///
/// Implementations must make `reserve` atomic across callers. A `None` result
/// means "not this tick"; callers never retry within the same tick.
pub trait ReservationPool: Send + Sync + fmt::Debug {
    fn reserve(&self, request: &ReservationRequest) -> Option<String>;

    /// Return a reservation's funds to the pool. False when the id is unknown
    /// or was already released.
    fn release(&self, reservation_id: &str) -> bool;
}

#[derive(Debug)]
struct Held {
    budget_key: String,
    amounts: BTreeMap<String, Decimal>,
}

#[derive(Debug, Default)]
struct PoolState {
    budgets: HashMap<String, BTreeMap<String, Decimal>>,
    held: HashMap<String, Held>,
    next_id: u64,
}

/// In-memory pool with fixed per-key token budgets.
///
/// A reservation deducts from the key's remaining budget. Native-token floors
/// are checked against what would remain after the deduction.
#[derive(Debug, Default)]
pub struct FixedBudgetPool {
    state: Mutex<PoolState>,
}

impl FixedBudgetPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_budget(self, budget_key: &str, token: &str, amount: Decimal) -> Self {
        self.deposit(budget_key, token, amount);
        self
    }

    pub fn deposit(&self, budget_key: &str, token: &str, amount: Decimal) {
        let mut state = self.lock();
        let entry = state
            .budgets
            .entry(budget_key.to_string())
            .or_default()
            .entry(token.to_string())
            .or_insert_with(Decimal::zero);
        *entry += amount;
    }

    pub fn remaining(&self, budget_key: &str, token: &str) -> Decimal {
        self.lock()
            .budgets
            .get(budget_key)
            .and_then(|tokens| tokens.get(token))
            .copied()
            .unwrap_or_default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PoolState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl ReservationPool for FixedBudgetPool {
    fn reserve(&self, request: &ReservationRequest) -> Option<String> {
        let mut state = self.lock();
        let tokens = state.budgets.get(&request.budget_key)?;

        let mut after: BTreeMap<String, Decimal> = tokens.clone();
        for (token, amount) in &request.requirements {
            let left = after.get(token).copied().unwrap_or_default() - *amount;
            if left.is_negative() {
                return None;
            }
            after.insert(token.clone(), left);
        }
        if let Some(native) = &request.native_token {
            if request.min_native_balance.is_positive() {
                let left = after.get(native).copied().unwrap_or_default();
                if left < request.min_native_balance {
                    return None;
                }
            }
        }

        state.budgets.insert(request.budget_key.clone(), after);
        state.next_id += 1;
        let id = format!("{}:res-{}", request.budget_key, state.next_id);
        state.held.insert(
            id.clone(),
            Held {
                budget_key: request.budget_key.clone(),
                amounts: request.requirements.clone(),
            },
        );
        Some(id)
    }

    fn release(&self, reservation_id: &str) -> bool {
        let mut state = self.lock();
        let Some(held) = state.held.remove(reservation_id) else {
            return false;
        };
        let tokens = state.budgets.entry(held.budget_key).or_default();
        for (token, amount) in held.amounts {
            *tokens.entry(token).or_insert_with(Decimal::zero) += amount;
        }
        true
    }
}
