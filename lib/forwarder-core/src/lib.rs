//! Core types for the forward-auth adapter
//!
//! This library provides:
//! - Header policy (allowlist, forwarded descriptor, copy and merge rules)
//! - Forwarder configuration model
//! - Error taxonomy shared by the proxy and the binary

pub mod config;
pub mod error;
pub mod headers;

pub use config::ForwarderConfig;
pub use error::{ForwarderError, Result};
pub use headers::{ForwardedDescriptor, HeaderAllowlist};
