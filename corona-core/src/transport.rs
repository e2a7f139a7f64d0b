//! Delivery transports
//!
//! Flushing uses two transports:
//!
//! - a [`BeaconTransport`]: synchronous, fire-and-forget. It only reports
//!   whether it *accepted* the payload for background delivery, never whether
//!   the sink received it.
//! - a [`RequestTransport`]: an awaited POST whose result is known.
//!
//! The beacon is tried first; the request is the fallback when it refuses.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderValue, CONNECTION, CONTENT_TYPE};

use crate::config::CollectorConfig;
use crate::error::{Error, Result};

/// Content type of every payload
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// A fallback POST to the ingestion sink
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryRequest {
    pub url: String,
    /// JSON array of events
    pub body: String,
    pub content_type: &'static str,
    /// Ask the transport to keep the request alive through host teardown
    pub keep_alive: bool,
}

impl DeliveryRequest {
    /// JSON POST of `body` to `url`, kept alive through teardown
    pub fn json(url: &str, body: String) -> Self {
        Self {
            url: url.to_string(),
            body,
            content_type: JSON_CONTENT_TYPE,
            keep_alive: true,
        }
    }
}

/// Fire-and-forget sender that survives host teardown
pub trait BeaconTransport: Send + Sync {
    /// Returns true if the payload was accepted for background delivery
    fn send_beacon(&self, url: &str, payload: &str) -> bool;
}

/// Awaited sender whose outcome is reported
#[async_trait]
pub trait RequestTransport: Send + Sync {
    /// Ok only when the sink answered with a success status
    async fn post(&self, request: &DeliveryRequest) -> Result<()>;
}

/// The pair of transports a collector flushes through
#[derive(Clone)]
pub struct Transports {
    pub beacon: Arc<dyn BeaconTransport>,
    pub request: Arc<dyn RequestTransport>,
}

impl Transports {
    pub fn new(beacon: Arc<dyn BeaconTransport>, request: Arc<dyn RequestTransport>) -> Self {
        Self { beacon, request }
    }

    /// HTTP beacon and HTTP fallback sharing one client
    pub fn http(config: &CollectorConfig) -> Result<Self> {
        let client = build_client(config)?;
        Ok(Self {
            beacon: Arc::new(HttpBeacon::with_client(
                client.clone(),
                config.beacon_max_bytes,
            )),
            request: Arc::new(HttpTransport::with_client(client)),
        })
    }
}

fn build_client(config: &CollectorConfig) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()
        .map_err(|e| Error::Config(format!("failed to create HTTP client: {}", e)))
}

/// Beacon that refuses everything, for hosts without background delivery
#[derive(Debug, Default, Clone, Copy)]
pub struct UnsupportedBeacon;

impl BeaconTransport for UnsupportedBeacon {
    fn send_beacon(&self, _url: &str, _payload: &str) -> bool {
        false
    }
}

/// Beacon that hands the POST to a detached Tokio task.
///
/// Refuses payloads over its size limit and calls made outside a Tokio
/// runtime. Once accepted, the outcome is only visible in the logs.
pub struct HttpBeacon {
    client: reqwest::Client,
    max_bytes: usize,
}

impl HttpBeacon {
    pub fn new(config: &CollectorConfig) -> Result<Self> {
        Ok(Self::with_client(build_client(config)?, config.beacon_max_bytes))
    }

    pub fn with_client(client: reqwest::Client, max_bytes: usize) -> Self {
        Self { client, max_bytes }
    }
}

impl BeaconTransport for HttpBeacon {
    fn send_beacon(&self, url: &str, payload: &str) -> bool {
        if payload.len() > self.max_bytes {
            tracing::debug!(
                bytes = payload.len(),
                limit = self.max_bytes,
                "Beacon payload too large"
            );
            return false;
        }

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::debug!("No async runtime, beacon unavailable");
            return false;
        };

        let request = self
            .client
            .post(url)
            .header(CONTENT_TYPE, JSON_CONTENT_TYPE)
            .body(payload.to_string());
        let url = url.to_string();

        runtime.spawn(async move {
            match request.send().await {
                Ok(response) if response.status().is_success() => {
                    tracing::trace!(url = %url, "Beacon delivered");
                }
                Ok(response) => {
                    tracing::debug!(url = %url, status = %response.status(), "Beacon rejected by sink");
                }
                Err(e) => tracing::debug!(url = %url, error = %e, "Beacon failed"),
            }
        });

        true
    }
}

/// reqwest-backed fallback transport
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(config: &CollectorConfig) -> Result<Self> {
        Ok(Self::with_client(build_client(config)?))
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl RequestTransport for HttpTransport {
    async fn post(&self, request: &DeliveryRequest) -> Result<()> {
        let mut builder = self
            .client
            .post(&request.url)
            .header(CONTENT_TYPE, HeaderValue::from_static(request.content_type))
            .body(request.body.clone());

        if request.keep_alive {
            builder = builder.header(CONNECTION, HeaderValue::from_static("keep-alive"));
        }

        let response = builder
            .send()
            .await
            .map_err(|e| Error::Transport(format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(Error::Status(status.as_u16()))
        }
    }
}
