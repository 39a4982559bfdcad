//! Balance transition rule shared by the swap and sweep drivers

use rust_decimal::Decimal;

use super::types::BalanceAction;
use crate::feed::SwapSide;

/// Holding threshold and noise tolerance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Thresholds {
    /// Minimum balance to count as a holder
    pub min_holding: Decimal,
    /// Movements this small are ignored
    pub epsilon: Decimal,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            min_holding: Decimal::from(10),
            epsilon: Decimal::new(1, 4),
        }
    }
}

/// Which driver observed the balance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Driver {
    /// A swap named the address
    Swap { side: SwapSide, btc_value: Decimal },
    /// Periodic or forced re-check of a held address
    Sweep,
}

impl Driver {
    pub fn btc_value(&self) -> Decimal {
        match self {
            Driver::Swap { btc_value, .. } => *btc_value,
            Driver::Sweep => Decimal::ZERO,
        }
    }
}

/// Outcome of a non-trivial balance change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub action: BalanceAction,
    pub delta: Decimal,
    /// New saved balance, or `None` to drop the entry
    pub retained: Option<Decimal>,
}

/// Classify a freshly observed balance against the saved one
///
/// `saved` is `None` when the address is untracked. Returns `None` for a
/// no-op: movement within epsilon, or an untracked address still below the
/// holding threshold.
pub fn classify(
    saved: Option<Decimal>,
    current: Decimal,
    driver: Driver,
    thresholds: &Thresholds,
) -> Option<Transition> {
    let prior = saved.unwrap_or(Decimal::ZERO);
    if (current - prior).abs() <= thresholds.epsilon {
        return None;
    }

    let below = current.is_zero() || current < thresholds.min_holding;

    let (action, delta) = match saved {
        None if below => return None,
        Some(prior) if below => (BalanceAction::Liquidated, -prior),
        None => {
            let action = match driver {
                Driver::Swap {
                    side: SwapSide::Sell,
                    ..
                } => BalanceAction::Sold,
                Driver::Swap { .. } | Driver::Sweep => BalanceAction::Invested,
            };
            (action, current)
        }
        Some(prior) if current > prior => (BalanceAction::Invested, current - prior),
        Some(prior) => (BalanceAction::Sold, current - prior),
    };

    Some(Transition {
        action,
        delta,
        retained: (!below).then_some(current),
    })
}
