//! Forge Client
//! Resilient JSON API client: rate limited, circuit broken, retried and
//! cached according to [`ClientConfig`].
//!
//! ```no_run
//! use forge_client::{ApiClient, ClientConfig};
//!
//! # async fn run() -> forge_client::Result<()> {
//! let config = ClientConfig::new("https://api.github.com").with_auth_token("ghp_example");
//! let client = ApiClient::new(config)?;
//!
//! let repo = client.get("/repos/rust-lang/rust", &[]).await?;
//! println!("{}", repo["full_name"]);
//!
//! let metrics = client.metrics().await;
//! println!("success rate: {:.2}", metrics.success_rate);
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod metrics;
pub mod request;
pub mod transport;

pub use client::{ApiClient, ClientBuilder};
pub use config::{ClientConfig, DEFAULT_USER_AGENT};
pub use metrics::{ClientMetrics, RemoteQuota};
pub use request::{ApiRequest, Method};
pub use transport::{Headers, ReqwestTransport, Transport, TransportRequest, TransportResponse};

pub use forge_core::{CircuitState, Error, Result, TransportError, TransportErrorKind};
pub use tokio_util::sync::CancellationToken;
