//! Request dispatcher
//! Composes cache, rate limiter, circuit breaker and retry policy around a
//! single transport call.
//!
//! ```text
//! execute → cache lookup (reads) → rate limiter → circuit breaker
//!         → transport attempt ⟲ retry policy
//!         → breaker + metrics bookkeeping → cache write (reads)
//! ```

use chrono::Utc;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};
use url::Url;
use uuid::Uuid;

use forge_core::{
    Admission, AttemptOutcome, CircuitBreaker, CircuitState, Error, RateLimiter, ResponseCache,
    Result, RetryDecision, RetryPolicy, SharedClock, SystemClock, TransportError,
};

use crate::config::ClientConfig;
use crate::metrics::{ClientMetrics, MetricsCollector, RemoteQuota};
use crate::request::ApiRequest;
use crate::transport::{Headers, ReqwestTransport, Transport, TransportRequest, TransportResponse};

/// Builder for [`ApiClient`]
pub struct ClientBuilder {
    config: ClientConfig,
    transport: Option<Arc<dyn Transport>>,
    clock: Option<SharedClock>,
}

impl ClientBuilder {
    /// Replaces the default reqwest transport.
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn clock(mut self, clock: SharedClock) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn build(self) -> Result<ApiClient> {
        self.config.validate()?;
        let base_url = self.config.parsed_base_url()?;
        let transport = match self.transport {
            Some(transport) => transport,
            None => Arc::new(ReqwestTransport::new()?),
        };
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));

        info!(
            base_url = %base_url,
            max_requests_per_hour = self.config.max_requests_per_hour,
            max_retries = self.config.max_retries,
            caching = self.config.enable_caching,
            "API client ready"
        );

        Ok(ApiClient {
            limiter: RateLimiter::with_clock(self.config.rate_limit(), clock.clone()),
            breaker: Mutex::new(CircuitBreaker::with_clock(
                self.config.circuit_breaker(),
                clock.clone(),
            )),
            cache: ResponseCache::with_clock(self.config.cache(), clock),
            retry: self.config.retry_policy(),
            metrics: MetricsCollector::new(),
            base_url,
            transport,
            config: self.config,
        })
    }
}

/// Resilient client for one remote API.
///
/// All admission state lives in the instance; clients for different base
/// URLs never share quota or breaker state. Share one client between tasks
/// with an `Arc`.
pub struct ApiClient {
    config: ClientConfig,
    base_url: Url,
    transport: Arc<dyn Transport>,
    limiter: RateLimiter,
    breaker: Mutex<CircuitBreaker>,
    cache: ResponseCache<Value>,
    retry: RetryPolicy,
    metrics: MetricsCollector,
}

impl ApiClient {
    /// Creates a client using the reqwest transport.
    pub fn new(config: ClientConfig) -> Result<Self> {
        Self::builder(config).build()
    }

    pub fn builder(config: ClientConfig) -> ClientBuilder {
        ClientBuilder {
            config,
            transport: None,
            clock: None,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub async fn get(&self, path: &str, params: &[(&str, &str)]) -> Result<Value> {
        let request = ApiRequest::get(path).query_pairs(params.iter().copied());
        self.execute(request).await
    }

    /// GET and deserialize the body into `T`.
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str, params: &[(&str, &str)]) -> Result<T> {
        let value = self.get(path, params).await?;
        serde_json::from_value(value).map_err(|e| Error::decode(e.to_string()))
    }

    pub async fn post<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<Value> {
        self.execute(ApiRequest::post(path).json(body)?).await
    }

    pub async fn put<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<Value> {
        self.execute(ApiRequest::put(path).json(body)?).await
    }

    pub async fn patch<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<Value> {
        self.execute(ApiRequest::patch(path).json(body)?).await
    }

    pub async fn delete(&self, path: &str) -> Result<Value> {
        self.execute(ApiRequest::delete(path)).await
    }

    pub async fn execute(&self, request: ApiRequest) -> Result<Value> {
        self.execute_cancellable(request, CancellationToken::new()).await
    }

    /// Executes a call that stops with [`Error::Cancelled`] once `cancel` fires.
    pub async fn execute_cancellable(
        &self,
        request: ApiRequest,
        cancel: CancellationToken,
    ) -> Result<Value> {
        let span = info_span!(
            "api_call",
            call_id = %Uuid::new_v4(),
            method = %request.method,
            path = %request.path,
        );
        self.dispatch(request, cancel).instrument(span).await
    }

    async fn dispatch(&self, request: ApiRequest, cancel: CancellationToken) -> Result<Value> {
        self.metrics.record_request();

        let cache_key = (self.config.enable_caching && request.method.is_read())
            .then(|| request.cache_key());
        if let Some(key) = &cache_key {
            if let Some(value) = self.cache.get(key).await {
                debug!("Served from cache");
                self.metrics.record_cache_hit();
                return Ok(value);
            }
        }

        let outbound = match self.build_request(&request) {
            Ok(outbound) => outbound,
            Err(err) => {
                self.metrics.record_failure();
                return Err(err);
            }
        };

        if let Err(err) = self.limiter.check_request().await {
            warn!(error = %err, "Rejected by rate limiter");
            self.metrics.record_failure();
            return Err(err);
        }

        let admitted = self.breaker.lock().await.allow_request();
        let permit = match admitted {
            Ok(admission) => BreakerPermit::new(&self.breaker, admission),
            Err(err) => {
                warn!(error = %err, "Rejected by circuit breaker");
                self.metrics.record_failure();
                return Err(err);
            }
        };

        match self.send_with_retries(outbound, &cancel).await {
            Ok(response) => {
                permit.report(CircuitBreaker::record_success).await;

                let value = match decode_body(&response.body) {
                    Ok(value) => value,
                    Err(err) => {
                        error!(status = response.status, error = %err, "Undecodable response");
                        self.metrics.record_failure();
                        return Err(err);
                    }
                };

                self.metrics.record_success();
                if let Some(key) = cache_key {
                    self.cache.insert(key, value.clone()).await;
                }
                Ok(value)
            }
            Err(Error::Cancelled) => {
                permit.report(CircuitBreaker::record_cancelled).await;
                self.metrics.record_failure();
                debug!("Call cancelled");
                Err(Error::Cancelled)
            }
            Err(err) => {
                permit.report(CircuitBreaker::record_failure).await;
                self.metrics.record_failure();
                error!(error = %err, "Call failed");
                Err(err)
            }
        }
    }

    /// Runs attempts until the retry policy stops. No lock is held here.
    async fn send_with_retries(
        &self,
        request: TransportRequest,
        cancel: &CancellationToken,
    ) -> Result<TransportResponse> {
        let mut attempt: u32 = 0;

        loop {
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                result = self.attempt(request.clone()) => result,
            };

            let (outcome, last_error) = match result {
                Ok(response) => {
                    self.observe_quota(&response);
                    match AttemptOutcome::from_status(response.status) {
                        AttemptOutcome::Success => {
                            debug!(attempt, status = response.status, "Attempt succeeded");
                            return Ok(response);
                        }
                        outcome => (outcome, status_error(&response)),
                    }
                }
                Err(err) => (AttemptOutcome::TransportFailure, Error::Transport(err)),
            };

            match self.retry.decide(attempt, outcome) {
                RetryDecision::Retry(next_delay) => {
                    warn!(
                        attempt,
                        delay_ms = u64::try_from(next_delay.as_millis()).unwrap_or(u64::MAX),
                        error = %last_error,
                        "Attempt failed, backing off"
                    );
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(Error::Cancelled),
                        _ = tokio::time::sleep(next_delay) => {}
                    }
                    attempt += 1;
                }
                RetryDecision::Succeed | RetryDecision::Fail => return Err(last_error),
            }
        }
    }

    async fn attempt(&self, request: TransportRequest) -> std::result::Result<TransportResponse, TransportError> {
        let deadline = request.timeout;
        match tokio::time::timeout(deadline, self.transport.send(request)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::timeout(format!(
                "no response within {}ms",
                deadline.as_millis()
            ))),
        }
    }

    fn build_request(&self, request: &ApiRequest) -> Result<TransportRequest> {
        let path = request.path.trim_start_matches('/');
        let mut url = self
            .base_url
            .join(path)
            .map_err(|e| Error::invalid_request(format!("invalid path '{}': {}", request.path, e)))?;
        if url.origin() != self.base_url.origin() {
            return Err(Error::invalid_request(format!(
                "path '{}' leaves the configured base URL",
                request.path
            )));
        }

        if !request.query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in &request.query {
                pairs.append_pair(key, value);
            }
        }

        let mut headers = Headers::new();
        headers.insert("user-agent".into(), self.config.user_agent.clone());
        headers.insert("accept".into(), "application/json".into());
        if let Some(token) = &self.config.auth_token {
            headers.insert("authorization".into(), format!("Bearer {}", token));
        }

        let body = match &request.body {
            Some(body) => {
                headers.insert("content-type".into(), "application/json".into());
                let bytes = serde_json::to_vec(body)
                    .map_err(|e| Error::invalid_request(format!("unserializable body: {}", e)))?;
                Some(bytes)
            }
            None => None,
        };

        Ok(TransportRequest {
            method: request.method,
            url,
            headers,
            body,
            timeout: request.timeout.unwrap_or_else(|| self.config.request_timeout()),
        })
    }

    fn observe_quota(&self, response: &TransportResponse) {
        if let Some(quota) = RemoteQuota::from_response(response) {
            if quota.remaining == 0 {
                warn!(reset_at = ?quota.reset_at, "Remote quota exhausted");
            }
            self.metrics.record_remote_quota(quota);
        }
    }

    /// Snapshot of counters and resilience state.
    pub async fn metrics(&self) -> ClientMetrics {
        let counters = self.metrics.counters();
        let requests_last_hour = self.limiter.requests_in_window().await;
        let (circuit_state, failure_count) = {
            let breaker = self.breaker.lock().await;
            (breaker.state(), breaker.failure_count())
        };

        ClientMetrics {
            total_requests: counters.total,
            successful_requests: counters.successful,
            failed_requests: counters.failed,
            cached_responses: counters.cached,
            success_rate: counters.success_rate(),
            requests_last_hour,
            remaining_quota: self
                .config
                .max_requests_per_hour
                .saturating_sub(u32::try_from(requests_last_hour).unwrap_or(u32::MAX)),
            circuit_state,
            failure_count,
            cache_size: self.cache.len().await,
            remote_quota: self.metrics.remote_quota(),
            captured_at: Utc::now(),
        }
    }

    pub async fn clear_cache(&self) {
        self.cache.clear().await;
    }

    pub async fn reset_circuit_breaker(&self) {
        self.breaker.lock().await.reset();
    }

    pub async fn circuit_state(&self) -> CircuitState {
        self.breaker.lock().await.state()
    }
}

/// Breaker admission held for the length of one call.
///
/// Dropping it unreported, as happens when the call future itself is
/// dropped, hands a half-open trial slot back to the breaker.
struct BreakerPermit<'a> {
    breaker: &'a Mutex<CircuitBreaker>,
    admission: Option<Admission>,
}

impl<'a> BreakerPermit<'a> {
    fn new(breaker: &'a Mutex<CircuitBreaker>, admission: Admission) -> Self {
        Self {
            breaker,
            admission: Some(admission),
        }
    }

    async fn report(mut self, record: impl FnOnce(&mut CircuitBreaker, Admission)) {
        let breaker = self.breaker;
        let mut guard = breaker.lock().await;
        if let Some(admission) = self.admission.take() {
            record(&mut *guard, admission);
        }
    }
}

impl Drop for BreakerPermit<'_> {
    fn drop(&mut self) {
        let Some(admission) = self.admission.take() else {
            return;
        };
        if !admission.is_trial() {
            return;
        }
        // Contended lock: the breaker re-issues the trial once it times out
        match self.breaker.try_lock() {
            Ok(mut breaker) => {
                debug!("Call dropped, releasing half-open trial");
                breaker.record_cancelled(admission);
            }
            Err(_) => warn!("Call dropped while breaker busy, trial slot left to expire"),
        }
    }
}

fn status_error(response: &TransportResponse) -> Error {
    let body = String::from_utf8_lossy(&response.body).into_owned();
    if response.status >= 500 {
        Error::Server {
            status: response.status,
            body,
        }
    } else {
        Error::Client {
            status: response.status,
            body,
        }
    }
}

/// Bodiless responses decode to an empty object.
fn decode_body(body: &[u8]) -> Result<Value> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Object(Map::new()));
    }
    serde_json::from_slice(body).map_err(|e| Error::decode(format!("response is not JSON: {}", e)))
}
