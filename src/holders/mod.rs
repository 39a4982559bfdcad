//! Holder balance reconciliation
//!
//! For each tracked ticker, compares freshly fetched balances against the last
//! saved ones and turns real movements into ledger records:
//!
//! ```text
//! Untracked --(balance >= threshold)--> Held --(balance < threshold)--> Untracked
//!                                        |
//!                                        +-- Invested / Sold while still held
//! ```
//!
//! Two drivers feed the same rule: a swap naming an address, and a sweep over
//! every held address. Re-running either is safe; the epsilon comparison
//! against the saved balance is the only guard against double counting.

pub mod book;
pub mod reconciler;
pub mod source;
pub mod transition;
pub mod types;

use rust_decimal::Decimal;
use serde::Deserialize;

pub use book::TickerBook;
pub use reconciler::HolderReconciler;
pub use source::{BalanceSource, HttpBalanceSource};
pub use transition::{classify, Driver, Thresholds, Transition};
pub use types::{
    BalanceAction, BalanceChangeRecord, ChangeSource, HolderChange, Holdings, SweepReport,
    TokenBalance,
};

/// A ticker whose holders are tracked
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TrackedTicker {
    /// Display ticker, e.g. `ODINDOG`
    pub ticker: String,
    /// Token id; swaps on this pool drive reconciliation
    pub token_id: String,
}

/// Holder reconciliation settings
#[derive(Debug, Clone, Deserialize)]
pub struct HoldersConfig {
    #[serde(default)]
    pub tickers: Vec<TrackedTicker>,

    /// Minimum balance to count as a holder (whole tokens)
    #[serde(default = "default_min_holding")]
    pub min_holding: Decimal,

    /// Balance movements up to this size are ignored
    #[serde(default = "default_epsilon")]
    pub epsilon: Decimal,

    /// Seconds between sweeps of every held address
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// Concurrent balance fetches during a sweep
    #[serde(default = "default_sweep_concurrency")]
    pub sweep_concurrency: usize,
}

fn default_min_holding() -> Decimal { Decimal::from(10) }
fn default_epsilon() -> Decimal { Decimal::new(1, 4) }
fn default_sweep_interval_secs() -> u64 { 3600 }
fn default_sweep_concurrency() -> usize { 4 }

impl HoldersConfig {
    pub fn thresholds(&self) -> Thresholds {
        Thresholds {
            min_holding: self.min_holding,
            epsilon: self.epsilon,
        }
    }
}

impl Default for HoldersConfig {
    fn default() -> Self {
        Self {
            tickers: Vec::new(),
            min_holding: default_min_holding(),
            epsilon: default_epsilon(),
            sweep_interval_secs: default_sweep_interval_secs(),
            sweep_concurrency: default_sweep_concurrency(),
        }
    }
}
