use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use forwarder_core::ForwarderConfig;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(
    name = "auth-forwarder",
    about = "Forward-auth adapter between a reverse proxy and a decision service",
    version = env!("CARGO_PKG_VERSION")
)]
pub struct Cli {
    /// YAML configuration file; flags and environment override its values
    #[arg(short, long, env = "AUTH_FORWARDER_CONFIG")]
    pub config: Option<PathBuf>,

    /// Listen address
    #[arg(short, long, env = "AUTH_FORWARDER_ADDRESS")]
    pub address: Option<String>,

    /// Base URL of the decision service
    #[arg(long, env = "AUTH_FORWARDER_FORWARD_ADDRESS")]
    pub forward_address: Option<String>,

    /// Extra headers to relay to the decision service (comma separated)
    #[arg(long, env = "AUTH_FORWARDER_HEADERS", value_delimiter = ',')]
    pub headers: Option<Vec<String>>,

    /// Redirect target for requests the decision service answers with 401
    #[arg(long, env = "AUTH_FORWARDER_REDIRECT_URL")]
    pub redirect_url: Option<String>,

    /// Decision call timeout in seconds
    #[arg(long, env = "AUTH_FORWARDER_TIMEOUT_SECS")]
    pub timeout_secs: Option<u64>,

    /// Skip TLS certificate verification for the decision service
    #[arg(long, env = "AUTH_FORWARDER_INSECURE_SKIP_VERIFY")]
    pub insecure_skip_verify: bool,

    /// Reply 400 to probes without X-Forwarded-Host or X-Forwarded-Uri
    #[arg(long, env = "AUTH_FORWARDER_REQUIRE_FORWARDED_HEADERS")]
    pub require_forwarded_headers: bool,

    /// Log output format
    #[arg(long, env = "AUTH_FORWARDER_LOG_FORMAT", value_enum, default_value_t = LogFormat::Json)]
    pub log_format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Json,
    Text,
}

impl Cli {
    /// Load the configuration file (if any) and apply flag overrides
    pub fn load_config(&self) -> Result<ForwarderConfig> {
        let config = match &self.config {
            Some(path) => ForwarderConfig::from_file(path)
                .with_context(|| format!("failed to load config from {}", path.display()))?,
            None => ForwarderConfig::default(),
        };
        Ok(self.apply(config))
    }

    fn apply(&self, mut config: ForwarderConfig) -> ForwarderConfig {
        if let Some(address) = &self.address {
            config.address = address.clone();
        }
        if let Some(forward_address) = &self.forward_address {
            config.forward_address = forward_address.clone();
        }
        if let Some(headers) = &self.headers {
            config.headers = headers
                .iter()
                .map(|h| h.trim().to_string())
                .filter(|h| !h.is_empty())
                .collect();
        }
        if let Some(redirect_url) = &self.redirect_url {
            config.redirect_url = redirect_url.clone();
        }
        if let Some(secs) = self.timeout_secs {
            config.timeout = Duration::from_secs(secs);
        }
        config.insecure_skip_verify |= self.insecure_skip_verify;
        config.require_forwarded_headers |= self.require_forwarded_headers;
        config
    }
}
