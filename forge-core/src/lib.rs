//! Forge Core
//! Resilience primitives for outbound API calls: a sliding-window rate
//! limiter, a circuit breaker, an exponential retry policy and a TTL
//! response cache, all driven by a substitutable clock.

pub mod cache;
pub mod circuit;
pub mod clock;
pub mod error;
pub mod logging;
pub mod rate_limit;
pub mod retry;

// Re-export commonly used types
pub use cache::{cache_key, CacheConfig, CacheStats, ResponseCache};
pub use circuit::{Admission, CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use error::{Error, Result, TransportError, TransportErrorKind};
pub use rate_limit::{RateLimitConfig, RateLimiter};
pub use retry::{AttemptOutcome, RetryDecision, RetryPolicy};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_constant() {
        assert!(!VERSION.is_empty());
    }
}
