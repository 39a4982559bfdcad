//! Retry loop for outbound calls
//!
//! Only transient outcomes are retried (transport errors, HTTP 429/500/502/503/504).
//! A 429 carrying Retry-After waits for that long instead of the jittered delay,
//! clamped to `max_delay`. Cancellation stops the loop at once, including while
//! sleeping between attempts.

use backoff::future::retry;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::jitter::FullJitterBackoff;
use super::RetrievalConfig;
use crate::error::{Error, Result};

/// Bounds of the retry loop
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub backoff_factor: f64,
}

impl RetryPolicy {
    pub fn from_config(config: &RetrievalConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            backoff_factor: config.backoff_factor,
        }
    }

    pub fn backoff(&self) -> FullJitterBackoff {
        FullJitterBackoff::new(self.base_delay, self.max_delay, self.backoff_factor)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetrievalConfig::default())
    }
}

/// Run `op` under the retry policy
///
/// `op` receives the 1-based attempt number.
pub async fn retry_with_policy<T, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    label: &str,
    mut op: F,
) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0u32;
    let max_attempts = policy.max_retries.saturating_add(1);

    let run = retry(policy.backoff(), || {
        attempt += 1;
        let current = attempt;
        let fut = op(current);
        async move {
            if cancel.is_cancelled() {
                return Err(backoff::Error::permanent(Error::Cancelled));
            }

            match fut.await {
                Ok(value) => Ok(value),
                Err(e) if !e.is_retryable() => {
                    debug!(label = %label, attempt = current, error = %e, "Non-retryable failure");
                    Err(backoff::Error::permanent(e))
                }
                Err(e) if current >= max_attempts => {
                    warn!(label = %label, attempts = current, error = %e, "Retries exhausted");
                    Err(backoff::Error::permanent(Error::RetriesExhausted {
                        attempts: current,
                        last: Box::new(e),
                    }))
                }
                Err(e) => {
                    warn!(label = %label, attempt = current, error = %e, "Transient failure, retrying");
                    match e.retry_after() {
                        Some(hint) => Err(backoff::Error::retry_after(e, hint.min(policy.max_delay))),
                        None => Err(backoff::Error::transient(e)),
                    }
                }
            }
        }
    });

    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::Cancelled),
        result = run => result,
    }
}
