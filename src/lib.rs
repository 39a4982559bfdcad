//! Swap Sentinel Library
//!
//! Watches a DEX swap feed, keeps per-ticker holder balances and daily flow
//! in sync, flags hot tokens and routes alerts to notification sinks.

pub mod cli;
pub mod config;
pub mod error;
pub mod feed;
pub mod flow;
pub mod holders;
pub mod hot;
pub mod notify;
pub mod retrieval;
pub mod store;
pub mod wire;

// Re-export commonly used types
pub use config::Config;
pub use error::{Error, Result};
