//! Circuit breaker for upstream services
//!
//! Closed -> Open after `failure_threshold` consecutive failures.
//! Open rejects calls until `cooldown` has elapsed, then moves to HalfOpen and
//! admits a single trial call. Its outcome closes or re-opens the circuit.
//! Every admitted call holds a [`BreakerPermit`]; a permit dropped without an
//! outcome (cancelled or timed out by its caller) hands the trial slot back.

use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::error::{Error, Result};

/// State of the breaker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
struct BreakerInner {
    state: BreakerState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    trial_in_flight: bool,
}

/// Consecutive-failure circuit breaker
pub struct CircuitBreaker {
    name: String,
    failure_threshold: u32,
    cooldown: Duration,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            name: name.into(),
            failure_threshold: failure_threshold.max(1),
            cooldown,
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                trial_in_flight: false,
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BreakerInner> {
        // A poisoned breaker still holds consistent counters
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Ask permission to make a call
    pub fn try_acquire(&self) -> Result<BreakerPermit<'_>> {
        self.try_acquire_at(Instant::now())
    }

    pub fn try_acquire_at(&self, now: Instant) -> Result<BreakerPermit<'_>> {
        let mut inner = self.lock();
        match inner.state {
            BreakerState::Closed => Ok(BreakerPermit::new(self, false)),
            BreakerState::Open => {
                let cooled = inner
                    .opened_at
                    .map(|opened| now.saturating_duration_since(opened) >= self.cooldown)
                    .unwrap_or(true);
                if cooled {
                    info!(service = %self.name, "Circuit half-open, admitting a trial call");
                    inner.state = BreakerState::HalfOpen;
                    inner.trial_in_flight = true;
                    Ok(BreakerPermit::new(self, true))
                } else {
                    Err(Error::CircuitOpen(self.name.clone()))
                }
            }
            BreakerState::HalfOpen => {
                if inner.trial_in_flight {
                    Err(Error::CircuitOpen(self.name.clone()))
                } else {
                    inner.trial_in_flight = true;
                    Ok(BreakerPermit::new(self, true))
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.lock();
        if inner.state != BreakerState::Closed {
            info!(service = %self.name, "Circuit closed");
        }
        inner.state = BreakerState::Closed;
        inner.consecutive_failures = 0;
        inner.opened_at = None;
        inner.trial_in_flight = false;
    }

    pub fn record_failure(&self) {
        self.record_failure_at(Instant::now())
    }

    pub fn record_failure_at(&self, now: Instant) {
        let mut inner = self.lock();
        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);

        match inner.state {
            BreakerState::HalfOpen => {
                warn!(service = %self.name, "Trial call failed, circuit re-opened");
                inner.state = BreakerState::Open;
                inner.opened_at = Some(now);
                inner.trial_in_flight = false;
            }
            BreakerState::Closed if inner.consecutive_failures >= self.failure_threshold => {
                warn!(
                    service = %self.name,
                    failures = inner.consecutive_failures,
                    cooldown_secs = self.cooldown.as_secs(),
                    "Circuit opened"
                );
                inner.state = BreakerState::Open;
                inner.opened_at = Some(now);
            }
            _ => {}
        }
    }

    /// Release a half-open trial slot without judging the upstream
    fn release_trial(&self) {
        let mut inner = self.lock();
        if inner.state == BreakerState::HalfOpen && inner.trial_in_flight {
            info!(service = %self.name, "Trial call abandoned, slot released");
            inner.trial_in_flight = false;
        }
    }

    pub fn state(&self) -> BreakerState {
        self.lock().state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.lock().consecutive_failures
    }
}

/// Admission for one call
///
/// Settle it with [`success`](Self::success) or [`failure`](Self::failure).
/// Dropping an unsettled half-open permit frees the slot for the next caller.
#[must_use]
pub struct BreakerPermit<'a> {
    breaker: &'a CircuitBreaker,
    trial: bool,
    settled: bool,
}

impl<'a> BreakerPermit<'a> {
    fn new(breaker: &'a CircuitBreaker, trial: bool) -> Self {
        Self {
            breaker,
            trial,
            settled: false,
        }
    }

    /// Whether this call is the half-open trial
    pub fn is_trial(&self) -> bool {
        self.trial
    }

    pub fn success(mut self) {
        self.settled = true;
        self.breaker.record_success();
    }

    pub fn failure(mut self) {
        self.settled = true;
        self.breaker.record_failure();
    }
}

impl Drop for BreakerPermit<'_> {
    fn drop(&mut self) {
        if !self.settled && self.trial {
            self.breaker.release_trial();
        }
    }
}
