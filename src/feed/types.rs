//! Swap records as the rest of the pipeline sees them

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Asset id of the native coin on the feed
pub const NATIVE_ASSET: &str = "btc";

/// Minimal native units per whole BTC
pub const SATS_PER_BTC: i64 = 100_000_000;

/// Convert minimal native units to whole BTC
pub fn sats_to_btc(sats: Decimal) -> Decimal {
    sats / Decimal::from(SATS_PER_BTC)
}

/// One side of a swap
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetLeg {
    pub asset: String,
    /// Native legs are in minimal units, token legs in whole tokens
    pub amount: Decimal,
}

impl AssetLeg {
    pub fn is_native(&self) -> bool {
        self.asset.eq_ignore_ascii_case(NATIVE_ASSET)
    }
}

/// Direction of a swap from the swapper's point of view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwapSide {
    /// Native in, token out
    Buy,
    /// Token in, native out
    Sell,
    /// Neither or both legs native
    Ambiguous,
}

impl fmt::Display for SwapSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SwapSide::Buy => write!(f, "buy"),
            SwapSide::Sell => write!(f, "sell"),
            SwapSide::Ambiguous => write!(f, "swap"),
        }
    }
}

/// A single observed swap (immutable once observed)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapRecord {
    pub id: String,
    pub pool_id: String,
    pub swapper: String,
    pub leg_in: AssetLeg,
    pub leg_out: AssetLeg,
    pub price: Decimal,
    pub fee: Decimal,
    pub created_at: DateTime<Utc>,
}

impl SwapRecord {
    pub fn side(&self) -> SwapSide {
        match (self.leg_in.is_native(), self.leg_out.is_native()) {
            (true, false) => SwapSide::Buy,
            (false, true) => SwapSide::Sell,
            _ => SwapSide::Ambiguous,
        }
    }

    /// Native leg in minimal units, zero if there is none
    pub fn native_sats(&self) -> Decimal {
        if self.leg_in.is_native() {
            self.leg_in.amount
        } else if self.leg_out.is_native() {
            self.leg_out.amount
        } else {
            Decimal::ZERO
        }
    }

    /// Native leg in whole BTC
    pub fn btc_value(&self) -> Decimal {
        sats_to_btc(self.native_sats())
    }

    /// Token leg amount, zero if there is none
    pub fn token_amount(&self) -> Decimal {
        if !self.leg_out.is_native() {
            self.leg_out.amount
        } else if !self.leg_in.is_native() {
            self.leg_in.amount
        } else {
            Decimal::ZERO
        }
    }
}

/// One page from the feed source
#[derive(Debug, Clone, Default)]
pub struct SwapPage {
    pub records: Vec<SwapRecord>,
    /// Total available upstream, if reported
    pub total: Option<u64>,
}

/// Most recent bounded window of swaps; dedup baseline for the next poll
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwapSnapshot {
    pub records: Vec<SwapRecord>,
    pub total: Option<u64>,
    pub fetched_at: DateTime<Utc>,
}

impl SwapSnapshot {
    pub fn from_page(page: SwapPage, window_size: usize) -> Self {
        let mut records = page.records;
        records.truncate(window_size);
        Self {
            records,
            total: page.total,
            fetched_at: Utc::now(),
        }
    }

    pub fn ids(&self) -> HashSet<&str> {
        self.records.iter().map(|r| r.id.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use chrono::TimeZone;

    /// A buy of `sats` native for `tokens` of `pool`
    pub fn buy(id: &str, pool: &str, swapper: &str, sats: i64, tokens: i64) -> SwapRecord {
        SwapRecord {
            id: id.to_string(),
            pool_id: pool.to_string(),
            swapper: swapper.to_string(),
            leg_in: AssetLeg {
                asset: NATIVE_ASSET.to_string(),
                amount: Decimal::from(sats),
            },
            leg_out: AssetLeg {
                asset: pool.to_string(),
                amount: Decimal::from(tokens),
            },
            price: Decimal::ONE,
            fee: Decimal::ZERO,
            created_at: Utc.with_ymd_and_hms(2026, 10, 19, 12, 0, 0).unwrap(),
        }
    }

    pub fn sell(id: &str, pool: &str, swapper: &str, sats: i64, tokens: i64) -> SwapRecord {
        let mut record = buy(id, pool, swapper, sats, tokens);
        std::mem::swap(&mut record.leg_in, &mut record.leg_out);
        record
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[test]
    fn test_side_and_value() {
        let b = buy("1", "2jjj", "bc1qa", 500_000, 1_000);
        assert_eq!(b.side(), SwapSide::Buy);
        assert_eq!(b.btc_value(), "0.005".parse::<Decimal>().unwrap());
        assert_eq!(b.token_amount(), Decimal::from(1_000));

        let s = sell("2", "2jjj", "bc1qa", 250_000, 10);
        assert_eq!(s.side(), SwapSide::Sell);
        assert_eq!(s.btc_value(), "0.0025".parse::<Decimal>().unwrap());
        assert_eq!(s.token_amount(), Decimal::from(10));
    }

    #[test]
    fn test_token_for_token_is_ambiguous() {
        let mut r = buy("1", "2jjj", "bc1qa", 1, 1);
        r.leg_in.asset = "other".to_string();
        assert_eq!(r.side(), SwapSide::Ambiguous);
        assert_eq!(r.btc_value(), Decimal::ZERO);
    }

    #[test]
    fn test_snapshot_caps_window() {
        let page = SwapPage {
            records: (0..5)
                .map(|i| buy(&i.to_string(), "p", "a", 1, 1))
                .collect(),
            total: Some(1_000),
        };
        let snapshot = SwapSnapshot::from_page(page, 3);
        assert_eq!(snapshot.len(), 3);
        assert_eq!(snapshot.records[0].id, "0");
        assert!(snapshot.ids().contains("2"));
    }
}
