//! Decision service client
//!
//! One attempt per inbound probe: no retries, no redirect following, and a
//! fixed per-call timeout after which the call counts as a transport failure.

use crate::decision::DecisionRequest;
use forwarder_core::{ForwarderConfig, ForwarderError, Result};
use hyper::body::Bytes;
use hyper::header::HeaderMap;
use hyper::StatusCode;
use reqwest::redirect::Policy;
use std::time::Duration;
use tracing::{debug, info, warn};

/// What came back from the decision service.
#[derive(Debug)]
pub struct DecisionResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    /// Response body. Only read when the status is not 200; a failed read is
    /// kept here so the interpreter can turn it into a 500.
    pub body: std::result::Result<Bytes, ForwarderError>,
}

/// HTTP client for the decision service
#[derive(Clone)]
pub struct DecisionClient {
    client: reqwest::Client,
    timeout: Duration,
}

impl DecisionClient {
    /// Create a client that verifies TLS certificates
    pub fn new(timeout: Duration) -> Result<Self> {
        Self::build(timeout, false)
    }

    /// Create a client from the forwarder configuration
    pub fn from_config(config: &ForwarderConfig) -> Result<Self> {
        Self::build(config.timeout, config.insecure_skip_verify)
    }

    fn build(timeout: Duration, insecure_skip_verify: bool) -> Result<Self> {
        if insecure_skip_verify {
            warn!("TLS certificate verification disabled for decision service");
        }

        // Redirects must reach the interpreter as responses
        let client = reqwest::Client::builder()
            .redirect(Policy::none())
            .timeout(timeout)
            .danger_accept_invalid_certs(insecure_skip_verify)
            .build()
            .map_err(|e| {
                ForwarderError::InvalidConfiguration(format!("failed to build HTTP client: {}", e))
            })?;

        info!("DecisionClient initialized with {}s timeout", timeout.as_secs_f64());

        Ok(Self { client, timeout })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Send a decision request and collect the response
    pub async fn send(&self, request: DecisionRequest) -> Result<DecisionResponse> {
        let DecisionRequest { method, url, headers } = request;

        debug!("Sending decision request {} {} (headers: {})", method, url, headers.len());

        let response = self
            .client
            .request(method, url.as_str())
            .headers(headers)
            .send()
            .await
            .map_err(|e| self.classify(e, &url))?;

        let status = response.status();
        let headers = response.headers().clone();

        let body = if status == StatusCode::OK {
            Ok(Bytes::new())
        } else {
            response
                .bytes()
                .await
                .map_err(|e| ForwarderError::DecisionBodyRead(e.to_string()))
        };

        Ok(DecisionResponse { status, headers, body })
    }

    fn classify(&self, error: reqwest::Error, url: &str) -> ForwarderError {
        if error.is_timeout() {
            ForwarderError::Timeout(self.timeout)
        } else if error.is_builder() {
            ForwarderError::RequestConstruction {
                url: url.to_string(),
                reason: error.to_string(),
            }
        } else {
            ForwarderError::Transport(error.to_string())
        }
    }
}
