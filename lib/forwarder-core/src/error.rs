use hyper::StatusCode;
use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ForwarderError>;

#[derive(Error, Debug)]
pub enum ForwarderError {
    #[error("Invalid decision request target {url}: {reason}")]
    RequestConstruction { url: String, reason: String },

    #[error("Decision service unreachable: {0}")]
    Transport(String),

    #[error("Decision service timed out after {0:?}")]
    Timeout(Duration),

    #[error("Failed to read decision response body: {0}")]
    DecisionBodyRead(String),

    #[error("Missing forwarded header: {0}")]
    MissingForwardedHeader(&'static str),

    #[error("Instrumentation error: {0}")]
    Instrumentation(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Failed to read configuration file: {0}")]
    ConfigIo(#[from] std::io::Error),

    #[error("Failed to parse configuration file: {0}")]
    ConfigParse(#[from] serde_yaml::Error),
}

impl ForwarderError {
    /// Status written to the caller when this error ends a decision request.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ForwarderError::MissingForwardedHeader(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
