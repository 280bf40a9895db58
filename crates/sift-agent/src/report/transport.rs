//! Delivery of serialized report batches to the collector.

use crate::error::TransportError;
use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use std::time::Duration;
use tracing::debug;

/// Canonical content type for JSON.
pub const CONTENT_TYPE_JSON: &str = "application/json";

/// Content type sent along with JSON payloads.
pub const FULL_CONTENT_TYPE_JSON: &str = "application/json; charset=utf-8";

/// One delivery attempt per call. Implementations must not retry.
#[async_trait]
pub trait ReportTransport: Send + Sync + 'static {
    async fn deliver(&self, payload: Vec<u8>) -> Result<(), TransportError>;
}

/// POSTs JSON payloads to the collector endpoint.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpTransport {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(TransportError::Http)?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl ReportTransport for HttpTransport {
    async fn deliver(&self, payload: Vec<u8>) -> Result<(), TransportError> {
        let response = self
            .client
            .post(&self.endpoint)
            .header(ACCEPT, CONTENT_TYPE_JSON)
            .header(CONTENT_TYPE, FULL_CONTENT_TYPE_JSON)
            .body(payload)
            .send()
            .await?;

        let status = response.status();
        debug!(status = status.as_u16(), "report server answered");
        if !status.is_success() {
            return Err(TransportError::Status(status.as_u16()));
        }
        Ok(())
    }
}
