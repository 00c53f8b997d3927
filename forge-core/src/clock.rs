//! Time sources for window and TTL bookkeeping

use std::{
    fmt,
    sync::{Arc, Mutex, PoisonError},
    time::{Duration, Instant},
};

/// Supplies monotonic time to the rate limiter, circuit breaker and cache.
pub trait Clock: Send + Sync + fmt::Debug {
    fn now(&self) -> Instant;
}

/// Clock handle shared between the primitives of one client.
pub type SharedClock = Arc<dyn Clock>;

/// Wall clock backed by the tokio timer.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        // Tokio's clock honours `time::pause`, so backoff sleeps and window
        // arithmetic stay on the same timeline in tests.
        tokio::time::Instant::now().into_std()
    }
}

/// Manually driven clock for tests.
///
/// Clones share the same instant, so advancing one handle moves time for
/// every component built with it.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<Instant>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Arc::new(Mutex::new(Instant::now())),
        }
    }

    /// Moves the clock forward.
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now += by;
    }

    pub fn shared(&self) -> SharedClock {
        Arc::new(self.clone())
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_shared_between_clones() {
        let clock = ManualClock::new();
        let handle = clock.shared();
        let start = handle.now();

        clock.advance(Duration::from_secs(90));
        assert_eq!(handle.now().duration_since(start), Duration::from_secs(90));
    }

    #[tokio::test(start_paused = true)]
    async fn test_system_clock_follows_paused_time() {
        let clock = SystemClock;
        let start = clock.now();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(clock.now().duration_since(start) >= Duration::from_secs(5));
    }
}
