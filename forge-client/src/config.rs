//! Client configuration
//! Loadable from TOML; every field except `base_url` has a default.

use serde::{Deserialize, Serialize};
use std::{fmt, path::Path, time::Duration};
use url::Url;

use forge_core::{CacheConfig, CircuitBreakerConfig, Error, RateLimitConfig, Result, RetryPolicy};

/// Identifier sent as `User-Agent` unless overridden
pub const DEFAULT_USER_AGENT: &str = concat!("forge-client/", env!("CARGO_PKG_VERSION"));

/// Configuration for an [`ApiClient`](crate::ApiClient)
#[derive(Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Base URL every path is appended to
    pub base_url: String,
    /// Bearer credential
    #[serde(default)]
    pub auth_token: Option<String>,
    #[serde(default = "default_max_requests_per_hour")]
    pub max_requests_per_hour: u32,
    /// Additional attempts after the first for retryable failures
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_backoff_factor")]
    pub retry_backoff_factor: f64,
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    #[serde(default = "default_circuit_breaker_threshold")]
    pub circuit_breaker_threshold: u32,
    #[serde(default = "default_circuit_breaker_timeout_secs")]
    pub circuit_breaker_timeout_secs: u64,
    #[serde(default = "default_true")]
    pub enable_caching: bool,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Deadline for a single transport attempt
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_cache_max_entries")]
    pub cache_max_entries: usize,
    /// Ceiling on one backoff delay; unbounded when absent
    #[serde(default)]
    pub max_backoff_secs: Option<u64>,
    #[serde(default)]
    pub retry_jitter: bool,
}

fn default_max_requests_per_hour() -> u32 {
    5000
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_backoff_factor() -> f64 {
    2.0
}

fn default_cache_ttl_secs() -> u64 {
    300
}

fn default_circuit_breaker_threshold() -> u32 {
    5
}

fn default_circuit_breaker_timeout_secs() -> u64 {
    60
}

fn default_true() -> bool {
    true
}

fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_cache_max_entries() -> usize {
    1000
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            auth_token: None,
            max_requests_per_hour: default_max_requests_per_hour(),
            max_retries: default_max_retries(),
            retry_backoff_factor: default_retry_backoff_factor(),
            cache_ttl_secs: default_cache_ttl_secs(),
            circuit_breaker_threshold: default_circuit_breaker_threshold(),
            circuit_breaker_timeout_secs: default_circuit_breaker_timeout_secs(),
            enable_caching: true,
            user_agent: default_user_agent(),
            request_timeout_secs: default_request_timeout_secs(),
            cache_max_entries: default_cache_max_entries(),
            max_backoff_secs: None,
            retry_jitter: false,
        }
    }

    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config: Self = toml::from_str(source)
            .map_err(|e| Error::config(format!("invalid config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)
            .map_err(|e| Error::config(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_toml_str(&source)
    }

    /// Rejects settings the client cannot run with.
    pub fn validate(&self) -> Result<()> {
        self.parsed_base_url()?;

        if self.max_requests_per_hour == 0 {
            return Err(Error::config("max_requests_per_hour must be at least 1"));
        }
        if self.circuit_breaker_threshold == 0 {
            return Err(Error::config("circuit_breaker_threshold must be at least 1"));
        }
        if !self.retry_backoff_factor.is_finite() || self.retry_backoff_factor <= 0.0 {
            return Err(Error::config(format!(
                "retry_backoff_factor must be a positive number, got {}",
                self.retry_backoff_factor
            )));
        }
        if self.request_timeout_secs == 0 {
            return Err(Error::config("request_timeout_secs must be at least 1"));
        }
        Ok(())
    }

    /// Base URL with a trailing slash so relative paths append to it.
    pub(crate) fn parsed_base_url(&self) -> Result<Url> {
        let mut base = Url::parse(self.base_url.trim())
            .map_err(|e| Error::config(format!("invalid base_url '{}': {}", self.base_url, e)))?;

        if !matches!(base.scheme(), "http" | "https") {
            return Err(Error::config(format!(
                "base_url must be http or https, got '{}'",
                base.scheme()
            )));
        }
        if base.cannot_be_a_base() {
            return Err(Error::config(format!("base_url '{}' cannot be a base", self.base_url)));
        }

        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        base.set_query(None);
        Ok(base)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub(crate) fn rate_limit(&self) -> RateLimitConfig {
        RateLimitConfig {
            max_requests: self.max_requests_per_hour,
            window_size: Duration::from_secs(3600),
        }
    }

    pub(crate) fn circuit_breaker(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.circuit_breaker_threshold,
            reset_timeout: Duration::from_secs(self.circuit_breaker_timeout_secs),
        }
    }

    pub(crate) fn cache(&self) -> CacheConfig {
        CacheConfig {
            ttl: Duration::from_secs(self.cache_ttl_secs),
            max_entries: self.cache_max_entries,
        }
    }

    pub(crate) fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            backoff_factor: self.retry_backoff_factor,
            max_delay: self.max_backoff_secs.map(Duration::from_secs),
            jitter: self.retry_jitter,
        }
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("base_url", &self.base_url)
            .field("auth_token", &self.auth_token.as_ref().map(|_| "<redacted>"))
            .field("max_requests_per_hour", &self.max_requests_per_hour)
            .field("max_retries", &self.max_retries)
            .field("retry_backoff_factor", &self.retry_backoff_factor)
            .field("cache_ttl_secs", &self.cache_ttl_secs)
            .field("circuit_breaker_threshold", &self.circuit_breaker_threshold)
            .field("circuit_breaker_timeout_secs", &self.circuit_breaker_timeout_secs)
            .field("enable_caching", &self.enable_caching)
            .field("user_agent", &self.user_agent)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("cache_max_entries", &self.cache_max_entries)
            .field("max_backoff_secs", &self.max_backoff_secs)
            .field("retry_jitter", &self.retry_jitter)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::new("https://api.github.com");
        assert_eq!(config.max_requests_per_hour, 5000);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.retry_backoff_factor, 2.0);
        assert_eq!(config.cache_ttl_secs, 300);
        assert_eq!(config.circuit_breaker_threshold, 5);
        assert_eq!(config.circuit_breaker_timeout_secs, 60);
        assert!(config.enable_caching);
        assert!(config.user_agent.starts_with("forge-client/"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_toml() {
        let config = ClientConfig::from_toml_str(
            r#"
            base_url = "https://api.github.com"
            auth_token = "ghp_secret"
            max_retries = 5
            enable_caching = false
            "#,
        )
        .unwrap();

        assert_eq!(config.max_retries, 5);
        assert!(!config.enable_caching);
        assert_eq!(config.auth_token.as_deref(), Some("ghp_secret"));
        assert_eq!(config.cache_ttl_secs, 300);
    }

    #[test]
    fn test_base_url_is_required() {
        let err = ClientConfig::from_toml_str("max_retries = 1").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_validation() {
        let mut config = ClientConfig::new("ftp://example.com");
        assert!(config.validate().is_err());

        config.base_url = "https://example.com".into();
        config.retry_backoff_factor = f64::NAN;
        assert!(config.validate().is_err());

        config.retry_backoff_factor = 1.5;
        config.circuit_breaker_threshold = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_base_url_gains_trailing_slash() {
        let config = ClientConfig::new("https://ghe.example.com/api/v3?x=1");
        let base = config.parsed_base_url().unwrap();
        assert_eq!(base.as_str(), "https://ghe.example.com/api/v3/");
    }

    #[test]
    fn test_debug_redacts_token() {
        let config = ClientConfig::new("https://api.github.com").with_auth_token("ghp_secret");
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("ghp_secret"));
        assert!(rendered.contains("<redacted>"));
    }
}
