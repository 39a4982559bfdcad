//! Holder ledger types

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// How a holder's balance moved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BalanceAction {
    Invested,
    Sold,
    Liquidated,
}

impl fmt::Display for BalanceAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BalanceAction::Invested => write!(f, "invested"),
            BalanceAction::Sold => write!(f, "sold"),
            BalanceAction::Liquidated => write!(f, "liquidated"),
        }
    }
}

/// What triggered the balance check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeSource {
    Swap,
    Sweep,
}

/// One classified balance change; never mutated once appended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceChangeRecord {
    /// Balance observed after the change
    pub amount: Decimal,
    /// Signed change from the previously saved balance
    pub delta: Decimal,
    pub action: BalanceAction,
    /// BTC value of the triggering swap; zero for sweeps
    pub btc_value: Decimal,
    pub date: NaiveDate,
    pub source: ChangeSource,
    pub timestamp: DateTime<Utc>,
}

/// A classified transition ready for notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HolderChange {
    pub ticker: String,
    pub pool_id: String,
    pub address: String,
    /// Swap that triggered the check, if any
    pub swap_id: Option<String>,
    pub record: BalanceChangeRecord,
}

/// One token balance as reported by the balance source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenBalance {
    pub token_id: String,
    pub ticker: Option<String>,
    /// Raw balance string in whole tokens; may be unparsable
    pub balance: String,
}

/// Everything an address holds
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Holdings {
    /// Whole BTC
    pub native: Decimal,
    pub tokens: Vec<TokenBalance>,
}

impl Holdings {
    /// Balance string of one token, by id or ticker
    pub fn balance_of(&self, token_id: &str, ticker: &str) -> Option<&str> {
        self.tokens
            .iter()
            .find(|t| {
                t.token_id == token_id
                    || t
                        .ticker
                        .as_deref()
                        .is_some_and(|tk| tk.eq_ignore_ascii_case(ticker))
            })
            .map(|t| t.balance.as_str())
    }
}

/// Summary of one sweep over a ticker
#[derive(Debug, Clone, Default)]
pub struct SweepReport {
    pub ticker: String,
    /// Skipped because the ticker was already swept today
    pub skipped: bool,
    pub checked: usize,
    pub failed: usize,
    pub changes: Vec<HolderChange>,
}
