//! Hot-token detection
//!
//! Flags pools whose most recent swaps come from a broad set of addresses.
//! Works off one shared swap window so there is no request per candidate pool.

use dashmap::DashMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::feed::{sats_to_btc, SwapRecord};

/// Hot-token detection settings
#[derive(Debug, Clone, Deserialize)]
pub struct HotTokenConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Seconds between detection passes
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    /// Swaps of a pool to scan (K)
    #[serde(default = "default_min_swaps")]
    pub min_swaps: usize,

    /// Distinct swappers needed among those swaps (A)
    #[serde(default = "default_min_unique_addresses")]
    pub min_unique_addresses: usize,

    /// Seconds before the same pool can be flagged again
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
}

fn default_enabled() -> bool { true }
fn default_interval_secs() -> u64 { 30 }
fn default_min_swaps() -> usize { 6 }
fn default_min_unique_addresses() -> usize { 3 }
fn default_cooldown_secs() -> u64 { 3600 }

impl Default for HotTokenConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            interval_secs: default_interval_secs(),
            min_swaps: default_min_swaps(),
            min_unique_addresses: default_min_unique_addresses(),
            cooldown_secs: default_cooldown_secs(),
        }
    }
}

/// Activity of one pool within the window
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolActivity {
    pub pool_id: String,
    /// Swaps scanned (at most K)
    pub swap_count: usize,
    /// Distinct swappers among the scanned swaps
    pub unique_addresses: usize,
    /// Native volume of the scanned swaps, whole BTC
    pub btc_volume: Decimal,
    pub hot: bool,
}

/// Scan one pool's first `min_swaps` swaps in feed order
pub fn evaluate_pool(
    window: &[SwapRecord],
    pool_id: &str,
    min_swaps: usize,
    min_unique: usize,
) -> PoolActivity {
    let scanned: Vec<&SwapRecord> = window
        .iter()
        .filter(|r| r.pool_id == pool_id)
        .take(min_swaps)
        .collect();

    let unique: HashSet<&str> = scanned.iter().map(|r| r.swapper.as_str()).collect();
    let sats: Decimal = scanned.iter().map(|r| r.native_sats()).sum();

    PoolActivity {
        pool_id: pool_id.to_string(),
        swap_count: scanned.len(),
        unique_addresses: unique.len(),
        btc_volume: sats_to_btc(sats),
        hot: min_swaps > 0 && scanned.len() >= min_swaps && unique.len() >= min_unique,
    }
}

/// Evaluate every distinct pool, in order of first appearance
pub fn evaluate(window: &[SwapRecord], min_swaps: usize, min_unique: usize) -> Vec<PoolActivity> {
    let mut seen = HashSet::new();
    window
        .iter()
        .filter(|r| seen.insert(r.pool_id.as_str()))
        .map(|r| evaluate_pool(window, &r.pool_id, min_swaps, min_unique))
        .collect()
}

/// Detector with per-pool cooldown (process lifetime only)
pub struct HotTokenDetector {
    min_swaps: usize,
    min_unique: usize,
    cooldown: Duration,
    last_flagged: DashMap<String, Instant>,
}

impl HotTokenDetector {
    pub fn new(config: &HotTokenConfig) -> Self {
        Self {
            min_swaps: config.min_swaps,
            min_unique: config.min_unique_addresses,
            cooldown: Duration::from_secs(config.cooldown_secs),
            last_flagged: DashMap::new(),
        }
    }

    /// Hot pools not cooling down and not excluded; starts their cooldown
    pub fn detect(
        &self,
        window: &[SwapRecord],
        is_excluded: impl Fn(&str) -> bool,
    ) -> Vec<PoolActivity> {
        self.detect_at(window, is_excluded, Instant::now())
    }

    pub fn detect_at(
        &self,
        window: &[SwapRecord],
        is_excluded: impl Fn(&str) -> bool,
        now: Instant,
    ) -> Vec<PoolActivity> {
        let mut flagged = Vec::new();

        for activity in evaluate(window, self.min_swaps, self.min_unique) {
            if !activity.hot {
                continue;
            }
            if is_excluded(&activity.pool_id) {
                debug!(pool = %activity.pool_id, "Hot pool is block-listed");
                continue;
            }
            if self.cooling_down(&activity.pool_id, now) {
                debug!(pool = %activity.pool_id, "Hot pool still cooling down");
                continue;
            }

            self.last_flagged.insert(activity.pool_id.clone(), now);
            info!(
                pool = %activity.pool_id,
                swaps = activity.swap_count,
                unique = activity.unique_addresses,
                btc = %activity.btc_volume,
                "Hot token"
            );
            flagged.push(activity);
        }

        flagged
    }

    fn cooling_down(&self, pool_id: &str, now: Instant) -> bool {
        self.last_flagged
            .get(pool_id)
            .is_some_and(|last| now.saturating_duration_since(*last) < self.cooldown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::types::fixtures::buy;

    fn swaps(pool: &str, swappers: &[&str]) -> Vec<SwapRecord> {
        swappers
            .iter()
            .enumerate()
            .map(|(i, who)| buy(&format!("{}-{}", pool, i), pool, who, 100_000, 10))
            .collect()
    }

    fn config() -> HotTokenConfig {
        HotTokenConfig {
            min_swaps: 6,
            min_unique_addresses: 3,
            ..Default::default()
        }
    }

    #[test]
    fn test_broad_activity_is_hot() {
        let window = swaps("X", &["a", "b", "c", "d", "a", "b"]);
        let activity = evaluate_pool(&window, "X", 6, 3);

        assert!(activity.hot);
        assert_eq!(activity.swap_count, 6);
        assert_eq!(activity.unique_addresses, 4);
        assert_eq!(activity.btc_volume, "0.006".parse::<Decimal>().unwrap());
    }

    #[test]
    fn test_narrow_activity_is_not_hot() {
        let window = swaps("X", &["a", "b", "a", "b", "a", "b"]);
        let activity = evaluate_pool(&window, "X", 6, 3);

        assert!(!activity.hot);
        assert_eq!(activity.unique_addresses, 2);
    }

    #[test]
    fn test_too_few_swaps_is_not_hot() {
        let window = swaps("X", &["a", "b", "c", "d", "e"]);
        assert!(!evaluate_pool(&window, "X", 6, 3).hot);
    }

    #[test]
    fn test_only_first_k_swaps_counted() {
        // Later swaps from new addresses do not help
        let window = swaps("X", &["a", "b", "a", "b", "a", "b", "c", "d"]);
        let activity = evaluate_pool(&window, "X", 6, 3);
        assert!(!activity.hot);
        assert_eq!(activity.swap_count, 6);
    }

    #[test]
    fn test_interleaved_pools() {
        let mut window = Vec::new();
        let x = swaps("X", &["a", "b", "c", "d", "e", "f"]);
        let y = swaps("Y", &["a", "a"]);
        for (i, swap) in x.into_iter().enumerate() {
            window.push(swap);
            if let Some(other) = y.get(i) {
                window.push(other.clone());
            }
        }

        let all = evaluate(&window, 6, 3);
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].pool_id, "X");
        assert!(all[0].hot);
        assert!(!all[1].hot);
    }

    #[test]
    fn test_cooldown_suppresses_repeat() {
        let detector = HotTokenDetector::new(&config());
        let window = swaps("X", &["a", "b", "c", "d", "e", "f"]);
        let start = Instant::now();

        assert_eq!(detector.detect_at(&window, |_| false, start).len(), 1);
        assert!(detector
            .detect_at(&window, |_| false, start + Duration::from_secs(1800))
            .is_empty());
        assert_eq!(
            detector
                .detect_at(&window, |_| false, start + Duration::from_secs(3600))
                .len(),
            1
        );
    }

    #[test]
    fn test_block_listed_pool_skipped() {
        let detector = HotTokenDetector::new(&config());
        let window = swaps("X", &["a", "b", "c", "d", "e", "f"]);

        assert!(detector.detect(&window, |pool| pool == "X").is_empty());
        // Not flagged, so no cooldown started
        assert_eq!(detector.detect(&window, |_| false).len(), 1);
    }
}
