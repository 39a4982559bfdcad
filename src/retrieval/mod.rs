//! Resilient retrieval - every outbound call goes through here
//!
//! Layers, outermost first:
//! - overall call deadline and cancellation
//! - retry loop (exponential backoff, full jitter, Retry-After aware)
//! - circuit breaker (per upstream service)
//! - token-bucket rate limiter
//! - per-attempt timeout

pub mod circuit_breaker;
pub mod client;
pub mod credentials;
pub mod jitter;
pub mod rate_limit;
pub mod retry;

use serde::Deserialize;

pub use circuit_breaker::{BreakerPermit, BreakerState, CircuitBreaker};
pub use client::ResilientClient;
pub use credentials::{AuthMode, BearerToken, CredentialProvider};
pub use jitter::FullJitterBackoff;
pub use rate_limit::RequestLimiter;
pub use retry::{retry_with_policy, RetryPolicy};

/// Tuning for the retrieval stack, shared by every upstream client
#[derive(Debug, Clone, Deserialize)]
pub struct RetrievalConfig {
    /// Sustained request rate per upstream
    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: u32,

    /// Token bucket size
    #[serde(default = "default_burst")]
    pub burst: u32,

    /// Consecutive failures before the breaker opens
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Time the breaker stays open before admitting a trial call
    #[serde(default = "default_breaker_cooldown_secs")]
    pub breaker_cooldown_secs: u64,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,

    /// Timeout of a single HTTP attempt
    #[serde(default = "default_attempt_timeout_ms")]
    pub attempt_timeout_ms: u64,

    /// Deadline for a whole call including retries
    #[serde(default = "default_call_deadline_ms")]
    pub call_deadline_ms: u64,
}

fn default_requests_per_second() -> u32 { 5 }
fn default_burst() -> u32 { 10 }
fn default_failure_threshold() -> u32 { 5 }
fn default_breaker_cooldown_secs() -> u64 { 30 }
fn default_max_retries() -> u32 { 4 }
fn default_base_delay_ms() -> u64 { 250 }
fn default_max_delay_ms() -> u64 { 10_000 }
fn default_backoff_factor() -> f64 { 2.0 }
fn default_attempt_timeout_ms() -> u64 { 10_000 }
fn default_call_deadline_ms() -> u64 { 60_000 }

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            requests_per_second: default_requests_per_second(),
            burst: default_burst(),
            failure_threshold: default_failure_threshold(),
            breaker_cooldown_secs: default_breaker_cooldown_secs(),
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_factor: default_backoff_factor(),
            attempt_timeout_ms: default_attempt_timeout_ms(),
            call_deadline_ms: default_call_deadline_ms(),
        }
    }
}
