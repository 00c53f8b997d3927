//! Sliding-window rate limiting for outbound calls

use std::{
    collections::VecDeque,
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::sync::RwLock;
use tracing::debug;

use crate::clock::{SharedClock, SystemClock};
use crate::error::{Error, Result};

/// Rate limiting configuration
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Maximum number of requests per window
    pub max_requests: u32,
    /// Time window for rate limiting
    pub window_size: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 5000,
            window_size: Duration::from_secs(3600),
        }
    }
}

/// Fixed-capacity sliding window over admitted request timestamps.
///
/// Bursts are only shaped by the window boundary: up to `max_requests` calls
/// may be admitted back to back, after which callers wait for the oldest
/// entry to age out.
pub struct RateLimiter {
    config: RateLimitConfig,
    clock: SharedClock,
    requests: RwLock<VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: RateLimitConfig, clock: SharedClock) -> Self {
        Self {
            config,
            clock,
            requests: RwLock::new(VecDeque::new()),
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Checks if a request should be allowed, recording it when it is.
    ///
    /// A rejected request leaves the window untouched apart from dropping
    /// entries that had already expired.
    pub async fn check_request(&self) -> Result<()> {
        let now = self.clock.now();
        let mut requests = self.requests.write().await;
        prune(&mut requests, now, self.config.window_size);

        if requests.len() >= self.config.max_requests as usize {
            let wait = match requests.front() {
                Some(oldest) => self
                    .config
                    .window_size
                    .saturating_sub(now.duration_since(*oldest)),
                None => self.config.window_size,
            };
            debug!(
                in_window = requests.len(),
                max_requests = self.config.max_requests,
                wait_secs = wait.as_secs(),
                "Rate limit reached"
            );
            return Err(Error::RateLimitExceeded { wait });
        }

        requests.push_back(now);
        Ok(())
    }

    /// Number of admitted requests still inside the window.
    pub async fn requests_in_window(&self) -> usize {
        let now = self.clock.now();
        let requests = self.requests.read().await;
        requests
            .iter()
            .filter(|&&time| now.duration_since(time) < self.config.window_size)
            .count()
    }

    /// Admissions left before the window is full.
    pub async fn remaining(&self) -> u32 {
        let used = self.requests_in_window().await;
        self.config
            .max_requests
            .saturating_sub(u32::try_from(used).unwrap_or(u32::MAX))
    }

    /// Drops expired entries.
    pub async fn cleanup(&self) {
        let now = self.clock.now();
        let mut requests = self.requests.write().await;
        prune(&mut requests, now, self.config.window_size);
    }
}

fn prune(requests: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    while let Some(&oldest) = requests.front() {
        if now.duration_since(oldest) < window {
            break;
        }
        requests.pop_front();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn limiter(max_requests: u32, clock: &ManualClock) -> RateLimiter {
        RateLimiter::with_clock(
            RateLimitConfig {
                max_requests,
                window_size: Duration::from_secs(3600),
            },
            clock.shared(),
        )
    }

    #[tokio::test]
    async fn test_rejects_beyond_limit() {
        let clock = ManualClock::new();
        let limiter = limiter(3, &clock);

        for _ in 0..3 {
            limiter.check_request().await.unwrap();
            clock.advance(Duration::from_secs(10));
        }

        match limiter.check_request().await {
            Err(Error::RateLimitExceeded { wait }) => {
                // Oldest entry was admitted 30s ago
                assert_eq!(wait, Duration::from_secs(3570));
            }
            other => panic!("expected rate limit rejection, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_rejection_does_not_mutate_window() {
        let clock = ManualClock::new();
        let limiter = limiter(2, &clock);
        limiter.check_request().await.unwrap();
        limiter.check_request().await.unwrap();

        for _ in 0..5 {
            assert!(limiter.check_request().await.is_err());
        }
        assert_eq!(limiter.requests_in_window().await, 2);
        assert_eq!(limiter.remaining().await, 0);
    }

    #[tokio::test]
    async fn test_window_slides() {
        let clock = ManualClock::new();
        let limiter = limiter(2, &clock);
        limiter.check_request().await.unwrap();
        clock.advance(Duration::from_secs(1800));
        limiter.check_request().await.unwrap();
        assert!(limiter.check_request().await.is_err());

        // First entry ages out, second is still live
        clock.advance(Duration::from_secs(1800));
        limiter.check_request().await.unwrap();
        assert_eq!(limiter.requests_in_window().await, 2);
        assert!(limiter.check_request().await.is_err());
    }

    #[tokio::test]
    async fn test_zero_limit_waits_full_window() {
        let clock = ManualClock::new();
        let limiter = limiter(0, &clock);
        let err = limiter.check_request().await.unwrap_err();
        assert_eq!(err.retry_after(), Some(Duration::from_secs(3600)));
    }

    #[tokio::test]
    async fn test_cleanup_and_remaining() {
        let clock = ManualClock::new();
        let limiter = limiter(10, &clock);
        for _ in 0..4 {
            limiter.check_request().await.unwrap();
        }
        assert_eq!(limiter.remaining().await, 6);

        clock.advance(Duration::from_secs(3600));
        assert_eq!(limiter.requests_in_window().await, 0);
        limiter.cleanup().await;
        assert_eq!(limiter.remaining().await, 10);
    }
}
