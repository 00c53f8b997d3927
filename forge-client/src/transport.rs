//! Transport boundary
//! The dispatcher only needs something that can send a request and hand back
//! status, headers and body. [`ReqwestTransport`] is the production adapter.

use async_trait::async_trait;
use std::{collections::BTreeMap, time::Duration};
use tracing::debug;
use url::Url;

use forge_core::{Error, Result, TransportError};

use crate::request::Method;

/// Header map with lowercase names
pub type Headers = BTreeMap<String, String>;

/// A fully built outbound request
#[derive(Debug, Clone, PartialEq)]
pub struct TransportRequest {
    pub method: Method,
    pub url: Url,
    pub headers: Headers,
    pub body: Option<Vec<u8>>,
    /// Deadline for this attempt
    pub timeout: Duration,
}

/// Raw response from the remote service
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TransportResponse {
    pub status: u16,
    pub headers: Headers,
    pub body: Vec<u8>,
}

impl TransportResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers: Headers::new(),
            body: body.into(),
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }
}

/// Sends one request attempt
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: TransportRequest) -> std::result::Result<TransportResponse, TransportError>;
}

/// Transport backed by a shared `reqwest::Client`
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    http_client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .build()
            .map_err(|e| Error::config(format!("failed to create HTTP client: {}", e)))?;
        Ok(Self { http_client })
    }

    pub fn from_client(http_client: reqwest::Client) -> Self {
        Self { http_client }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: TransportRequest) -> std::result::Result<TransportResponse, TransportError> {
        let method = match request.method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Patch => reqwest::Method::PATCH,
            Method::Delete => reqwest::Method::DELETE,
        };

        let mut builder = self
            .http_client
            .request(method, request.url.as_str())
            .timeout(request.timeout);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await.map_err(classify)?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|value| (name.as_str().to_ascii_lowercase(), value.to_string()))
            })
            .collect();
        let body = response.bytes().await.map_err(classify)?.to_vec();

        debug!(status, bytes = body.len(), "Received response");
        Ok(TransportResponse { status, headers, body })
    }
}

fn classify(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::timeout(err.to_string())
    } else if err.is_connect() {
        TransportError::connect(err.to_string())
    } else {
        TransportError::other(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use forge_core::TransportErrorKind;

    #[test]
    fn test_response_headers_are_case_insensitive() {
        let response = TransportResponse::new(200, "{}").with_header("X-RateLimit-Remaining", "12");
        assert_eq!(response.header("x-ratelimit-remaining"), Some("12"));
        assert_eq!(response.header("X-RATELIMIT-REMAINING"), Some("12"));
        assert_eq!(response.header("etag"), None);
    }

    #[tokio::test]
    async fn test_connection_refused_is_connect_failure() {
        let transport = ReqwestTransport::new().unwrap();
        // Bind then drop so the port is known to be closed
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };

        let request = TransportRequest {
            method: Method::Get,
            url: Url::parse(&format!("http://127.0.0.1:{}/status", port)).unwrap(),
            headers: Headers::new(),
            body: None,
            timeout: Duration::from_secs(5),
        };

        let err = transport.send(request).await.unwrap_err();
        assert_eq!(err.kind, TransportErrorKind::Connect);
    }
}
