//! Metrics collection for API calls
//! Counters are only written by the dispatcher; callers read snapshots.

use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Mutex, PoisonError,
};

use forge_core::CircuitState;

use crate::transport::TransportResponse;

/// Quota the remote service reported in its last response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RemoteQuota {
    pub limit: Option<u64>,
    pub remaining: u64,
    pub reset_at: Option<DateTime<Utc>>,
}

impl RemoteQuota {
    /// Reads `X-RateLimit-*` headers, if the service sent them.
    pub fn from_response(response: &TransportResponse) -> Option<Self> {
        let remaining = response.header("x-ratelimit-remaining")?.trim().parse().ok()?;
        let limit = response
            .header("x-ratelimit-limit")
            .and_then(|v| v.trim().parse().ok());
        let reset_at = response
            .header("x-ratelimit-reset")
            .and_then(|v| v.trim().parse::<i64>().ok())
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single());

        Some(Self {
            limit,
            remaining,
            reset_at,
        })
    }
}

/// Point-in-time view of a client's health and usage
#[derive(Debug, Clone, Serialize)]
pub struct ClientMetrics {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub cached_responses: u64,
    /// `successful_requests / total_requests`, 0 before any call
    pub success_rate: f64,
    pub requests_last_hour: usize,
    pub remaining_quota: u32,
    pub circuit_state: CircuitState,
    pub failure_count: u32,
    pub cache_size: usize,
    pub remote_quota: Option<RemoteQuota>,
    pub captured_at: DateTime<Utc>,
}

/// Counter values at snapshot time
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Counters {
    pub total: u64,
    pub successful: u64,
    pub failed: u64,
    pub cached: u64,
}

impl Counters {
    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.successful as f64 / self.total as f64
        }
    }
}

/// Passive counters owned by one client
#[derive(Debug, Default)]
pub(crate) struct MetricsCollector {
    total_requests: AtomicU64,
    successful_requests: AtomicU64,
    failed_requests: AtomicU64,
    cached_responses: AtomicU64,
    remote_quota: Mutex<Option<RemoteQuota>>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_request(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_success(&self) {
        self.successful_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failed_requests.fetch_add(1, Ordering::Relaxed);
    }

    /// A cache hit is a successful logical call that never left the process.
    pub fn record_cache_hit(&self) {
        self.cached_responses.fetch_add(1, Ordering::Relaxed);
        self.record_success();
    }

    pub fn record_remote_quota(&self, quota: RemoteQuota) {
        *self
            .remote_quota
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(quota);
    }

    pub fn remote_quota(&self) -> Option<RemoteQuota> {
        *self
            .remote_quota
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn counters(&self) -> Counters {
        Counters {
            total: self.total_requests.load(Ordering::Relaxed),
            successful: self.successful_requests.load(Ordering::Relaxed),
            failed: self.failed_requests.load(Ordering::Relaxed),
            cached: self.cached_responses.load(Ordering::Relaxed),
        }
    }
}
