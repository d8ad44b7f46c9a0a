//! Forwarder configuration model

use crate::{ForwarderError, Result};
use hyper::header::HeaderValue;
use hyper::Uri;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_ADDRESS: &str = "0.0.0.0:8080";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Runtime configuration for the forwarder.
///
/// Field names accept both snake_case and the camelCase spellings used by
/// existing deployment files (`forwardAddress`, `redirectURL`).
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct ForwarderConfig {
    /// Listen address for the HTTP server
    pub address: String,
    /// Base URL of the decision service
    #[serde(alias = "forwardAddress", alias = "forwardaddress")]
    pub forward_address: String,
    /// Extra inbound headers to relay to the decision service
    pub headers: Vec<String>,
    /// Where denied (401) requests are redirected
    #[serde(alias = "redirectURL", alias = "redirectUrl", alias = "redirecturl")]
    pub redirect_url: String,
    /// Timeout for a single decision call
    #[serde(alias = "timeoutSecs", with = "duration_secs")]
    pub timeout: Duration,
    /// Skip certificate verification on HTTPS decision services
    #[serde(alias = "insecureSkipVerify")]
    pub insecure_skip_verify: bool,
    /// Reply 400 when the forwarded host or URI is missing
    #[serde(alias = "requireForwardedHeaders")]
    pub require_forwarded_headers: bool,
}

impl Default for ForwarderConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_ADDRESS.to_string(),
            forward_address: String::new(),
            headers: Vec::new(),
            redirect_url: String::new(),
            timeout: DEFAULT_TIMEOUT,
            insecure_skip_verify: false,
            require_forwarded_headers: false,
        }
    }
}

impl ForwarderConfig {
    /// Load configuration from a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_yaml(&raw)
    }

    pub fn from_yaml(raw: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(raw)?)
    }

    /// Check the configuration before any listener or client is created
    pub fn validate(&self) -> Result<()> {
        self.socket_addr()?;

        let base: Uri = self.forward_address.parse().map_err(|e| {
            ForwarderError::InvalidConfiguration(format!(
                "forward address {:?} is not a valid URL: {}",
                self.forward_address, e
            ))
        })?;
        match base.scheme_str() {
            Some("http") | Some("https") if base.authority().is_some() => {}
            _ => {
                return Err(ForwarderError::InvalidConfiguration(format!(
                    "forward address {:?} must be an absolute http(s) URL",
                    self.forward_address
                )))
            }
        }

        if self.redirect_url.is_empty() {
            return Err(ForwarderError::InvalidConfiguration(
                "redirect URL must be set".to_string(),
            ));
        }
        if HeaderValue::from_str(&self.redirect_url).is_err() {
            return Err(ForwarderError::InvalidConfiguration(format!(
                "redirect URL {:?} is not a valid Location header value",
                self.redirect_url
            )));
        }

        if self.timeout.is_zero() {
            return Err(ForwarderError::InvalidConfiguration(
                "timeout must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }

    pub fn socket_addr(&self) -> Result<SocketAddr> {
        self.address.parse().map_err(|e| {
            ForwarderError::InvalidConfiguration(format!(
                "listen address {:?} is invalid: {}",
                self.address, e
            ))
        })
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Duration::from_secs(u64::deserialize(deserializer)?))
    }
}
