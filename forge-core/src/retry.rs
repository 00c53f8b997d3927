//! Exponential backoff retry policy.
//!
//! The policy only decides; sleeping and re-sending are left to the
//! dispatcher so no lock is ever held while waiting.

use rand::Rng;
use std::time::Duration;

/// How a single transport attempt ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    Success,
    /// 4xx, retrying cannot change the answer
    ClientFailure,
    /// 5xx
    ServerFailure,
    /// No status was received
    TransportFailure,
}

impl AttemptOutcome {
    pub fn from_status(status: u16) -> Self {
        match status {
            0..=399 => AttemptOutcome::Success,
            400..=499 => AttemptOutcome::ClientFailure,
            _ => AttemptOutcome::ServerFailure,
        }
    }
}

/// What to do after an attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Succeed,
    Retry(Duration),
    Fail,
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Additional attempts after the first
    pub max_retries: u32,
    /// Base of the exponential delay, in seconds
    pub backoff_factor: f64,
    /// Upper bound on a single delay
    pub max_delay: Option<Duration>,
    /// Add up to 10% random delay on top of the computed backoff
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_factor: 2.0,
            max_delay: None,
            jitter: false,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, backoff_factor: f64) -> Self {
        Self {
            max_retries,
            backoff_factor,
            ..Self::default()
        }
    }

    /// Decides the next step after the 0-indexed `attempt` ended with `outcome`.
    pub fn decide(&self, attempt: u32, outcome: AttemptOutcome) -> RetryDecision {
        match outcome {
            AttemptOutcome::Success => RetryDecision::Succeed,
            AttemptOutcome::ClientFailure => RetryDecision::Fail,
            AttemptOutcome::ServerFailure | AttemptOutcome::TransportFailure => {
                if attempt < self.max_retries {
                    RetryDecision::Retry(self.backoff(attempt))
                } else {
                    RetryDecision::Fail
                }
            }
        }
    }

    /// Delay after the 0-indexed `attempt`: `backoff_factor ^ attempt` seconds.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let secs = self.backoff_factor.powi(exponent);
        let mut delay = Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX);

        if let Some(max_delay) = self.max_delay {
            delay = delay.min(max_delay);
        }

        if self.jitter {
            let jitter_range = delay.as_millis() / 10;
            if jitter_range > 0 {
                let jitter_ms = rand::thread_rng().gen_range(0..jitter_range);
                let jitter_ms = u64::try_from(jitter_ms).unwrap_or(u64::MAX);
                delay = delay.saturating_add(Duration::from_millis(jitter_ms));
            }
        }

        delay
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert_eq!(AttemptOutcome::from_status(200), AttemptOutcome::Success);
        assert_eq!(AttemptOutcome::from_status(204), AttemptOutcome::Success);
        assert_eq!(AttemptOutcome::from_status(304), AttemptOutcome::Success);
        assert_eq!(AttemptOutcome::from_status(404), AttemptOutcome::ClientFailure);
        assert_eq!(AttemptOutcome::from_status(429), AttemptOutcome::ClientFailure);
        assert_eq!(AttemptOutcome::from_status(500), AttemptOutcome::ServerFailure);
        assert_eq!(AttemptOutcome::from_status(503), AttemptOutcome::ServerFailure);
    }

    #[test]
    fn test_exponential_backoff() {
        let policy = RetryPolicy::new(3, 2.0);
        assert_eq!(policy.backoff(0), Duration::from_secs(1));
        assert_eq!(policy.backoff(1), Duration::from_secs(2));
        assert_eq!(policy.backoff(2), Duration::from_secs(4));
    }

    #[test]
    fn test_retries_until_exhausted() {
        let policy = RetryPolicy::new(3, 2.0);
        assert_eq!(
            policy.decide(0, AttemptOutcome::ServerFailure),
            RetryDecision::Retry(Duration::from_secs(1))
        );
        assert_eq!(
            policy.decide(2, AttemptOutcome::TransportFailure),
            RetryDecision::Retry(Duration::from_secs(4))
        );
        assert_eq!(policy.decide(3, AttemptOutcome::ServerFailure), RetryDecision::Fail);
    }

    #[test]
    fn test_client_failures_never_retry() {
        let policy = RetryPolicy::new(3, 2.0);
        assert_eq!(policy.decide(0, AttemptOutcome::ClientFailure), RetryDecision::Fail);
        assert_eq!(policy.decide(1, AttemptOutcome::Success), RetryDecision::Succeed);
    }

    #[test]
    fn test_ceiling_and_jitter() {
        let policy = RetryPolicy {
            max_retries: 10,
            backoff_factor: 2.0,
            max_delay: Some(Duration::from_secs(5)),
            jitter: true,
        };

        for attempt in 0..10 {
            let delay = policy.backoff(attempt);
            let base = Duration::from_secs(2u64.pow(attempt).min(5));
            assert!(delay >= base);
            assert!(delay <= base + base / 10);
        }
    }

    #[test]
    fn test_huge_exponent_saturates() {
        let policy = RetryPolicy::new(u32::MAX, 10.0);
        assert_eq!(policy.backoff(5000), Duration::MAX);
    }
}
