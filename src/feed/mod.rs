//! Swap feed ingestion
//!
//! Fetches the most recent window of swaps and yields the records that were
//! not in the previous window. The window is bounded: a swap that ages out of
//! two consecutive windows without being seen is missed.

pub mod poller;
pub mod source;
pub mod types;

use serde::Deserialize;

pub use poller::{diff, fetch_recent, SwapPoller};
pub use source::{HttpSwapFeed, SwapFeedSource};
pub use types::{sats_to_btc, AssetLeg, SwapPage, SwapRecord, SwapSide, SwapSnapshot};

/// Swap ingestion settings
#[derive(Debug, Clone, Deserialize)]
pub struct FeedConfig {
    /// Poll interval in seconds
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Swaps fetched per poll (dedup window)
    #[serde(default = "default_window_size")]
    pub window_size: usize,
}

fn default_poll_interval_secs() -> u64 { 15 }
fn default_window_size() -> usize { 100 }

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            window_size: default_window_size(),
        }
    }
}
