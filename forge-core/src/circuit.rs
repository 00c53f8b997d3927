//! Circuit breaker pattern for fault tolerance
//!
//! ```text
//! Closed   → Open:     failure_count reaches threshold
//! Open     → HalfOpen: next admission check after reset_timeout
//! HalfOpen → Closed:   trial call succeeds
//! HalfOpen → Open:     trial call fails (fresh timeout)
//! HalfOpen → HalfOpen: trial silent for reset_timeout, a new one is admitted
//! ```

use serde::Serialize;
use std::{
    fmt,
    sync::Arc,
    time::{Duration, Instant},
};
use tracing::{debug, info, warn};

use crate::clock::{SharedClock, SystemClock};
use crate::error::{Error, Result};

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Circuit is closed, allowing requests
    Closed,
    /// Circuit is open, blocking requests
    Open,
    /// Circuit is half-open, testing if service recovered
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half_open"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the circuit opens
    pub failure_threshold: u32,
    /// How long the circuit stays open before a trial call
    pub reset_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(60),
        }
    }
}

/// Ticket handed out by [`CircuitBreaker::allow_request`].
///
/// Results must be reported with the ticket of the call that produced them.
/// A ticket issued before the circuit last changed state is stale and its
/// result is ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    epoch: u64,
    trial: bool,
}

impl Admission {
    /// Whether this call is the half-open trial.
    pub fn is_trial(&self) -> bool {
        self.trial
    }
}

/// Circuit breaker guarding calls to one remote service
#[derive(Debug)]
pub struct CircuitBreaker {
    /// Current state of the circuit
    state: CircuitState,
    /// Number of consecutive failures
    failure_count: u32,
    config: CircuitBreakerConfig,
    /// When the circuit last opened
    opened_at: Option<Instant>,
    /// When the outstanding half-open trial was handed out
    trial_started: Option<Instant>,
    /// Bumped on every transition and trial hand-out
    epoch: u64,
    clock: SharedClock,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: CircuitBreakerConfig, clock: SharedClock) -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            config,
            opened_at: None,
            trial_started: None,
            epoch: 0,
            clock,
        }
    }

    pub fn state(&self) -> CircuitState {
        self.state
    }

    pub fn failure_count(&self) -> u32 {
        self.failure_count
    }

    /// Checks if a request should be allowed.
    ///
    /// An expired open circuit moves to half-open here and hands out its
    /// single trial slot to this caller. A trial that has not reported back
    /// within `reset_timeout` is considered lost and the slot is handed out
    /// again.
    pub fn allow_request(&mut self) -> Result<Admission> {
        let now = self.clock.now();

        match self.state {
            CircuitState::Closed => Ok(Admission {
                epoch: self.epoch,
                trial: false,
            }),
            CircuitState::Open => {
                let elapsed = self
                    .opened_at
                    .map(|opened| now.duration_since(opened))
                    .unwrap_or(self.config.reset_timeout);

                if elapsed < self.config.reset_timeout {
                    return Err(Error::CircuitBreakerOpen {
                        wait: self.config.reset_timeout - elapsed,
                    });
                }

                info!("Circuit breaker half-open, admitting trial call");
                self.state = CircuitState::HalfOpen;
                Ok(self.issue_trial(now))
            }
            CircuitState::HalfOpen => match self.trial_started {
                Some(started) if now.duration_since(started) < self.config.reset_timeout => {
                    Err(Error::CircuitBreakerOpen {
                        wait: Duration::ZERO,
                    })
                }
                Some(_) => {
                    warn!("Half-open trial never reported back, admitting another");
                    Ok(self.issue_trial(now))
                }
                None => Ok(self.issue_trial(now)),
            },
        }
    }

    /// Records a success and potentially closes the circuit
    pub fn record_success(&mut self, admission: Admission) {
        if self.is_stale(admission) {
            return;
        }

        match self.state {
            CircuitState::Closed => self.failure_count = 0,
            CircuitState::HalfOpen if admission.trial => {
                info!("Trial call succeeded, circuit breaker closed");
                self.close();
            }
            _ => {}
        }
    }

    /// Records a failure and potentially opens the circuit
    pub fn record_failure(&mut self, admission: Admission) {
        if self.is_stale(admission) {
            return;
        }

        match self.state {
            CircuitState::Closed => {
                self.failure_count = self.failure_count.saturating_add(1);
                if self.failure_count >= self.config.failure_threshold.max(1) {
                    warn!(
                        failures = self.failure_count,
                        timeout_secs = self.config.reset_timeout.as_secs(),
                        "Circuit breaker opened"
                    );
                    self.trip();
                }
            }
            CircuitState::HalfOpen if admission.trial => {
                self.failure_count = self.failure_count.saturating_add(1);
                warn!("Trial call failed, circuit breaker re-opened");
                self.trip();
            }
            _ => {}
        }
    }

    /// Gives back the half-open trial slot without judging the service.
    pub fn record_cancelled(&mut self, admission: Admission) {
        if admission.trial && !self.is_stale(admission) && self.state == CircuitState::HalfOpen {
            self.trial_started = None;
        }
    }

    /// Forces the circuit closed with a clean failure count.
    pub fn reset(&mut self) {
        info!("Circuit breaker reset");
        self.close();
    }

    fn is_stale(&self, admission: Admission) -> bool {
        if admission.epoch != self.epoch {
            debug!("Ignoring result of a call admitted before the last transition");
            return true;
        }
        false
    }

    fn issue_trial(&mut self, now: Instant) -> Admission {
        self.epoch += 1;
        self.trial_started = Some(now);
        Admission {
            epoch: self.epoch,
            trial: true,
        }
    }

    fn trip(&mut self) {
        self.state = CircuitState::Open;
        self.opened_at = Some(self.clock.now());
        self.trial_started = None;
        self.epoch += 1;
    }

    fn close(&mut self) {
        self.state = CircuitState::Closed;
        self.failure_count = 0;
        self.opened_at = None;
        self.trial_started = None;
        self.epoch += 1;
    }
}
