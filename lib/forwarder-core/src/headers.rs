//! Header policy: which inbound headers reach the decision service and how
//! decision headers are merged into the reply.

use crate::{ForwarderError, Result};
use hyper::header::{HeaderMap, HeaderName, HeaderValue};
use std::collections::BTreeMap;
use tracing::warn;

pub const X_FORWARDED_PROTO: &str = "X-Forwarded-Proto";
pub const X_FORWARDED_HOST: &str = "X-Forwarded-Host";
pub const X_FORWARDED_URI: &str = "X-Forwarded-Uri";
pub const X_FORWARDED_METHOD: &str = "X-Forwarded-Method";

/// Forwarded-metadata headers that are always eligible for copy.
pub const FORWARDED_HEADERS: [&str; 4] = [
    X_FORWARDED_PROTO,
    X_FORWARDED_HOST,
    X_FORWARDED_URI,
    X_FORWARDED_METHOD,
];

/// Connection-level headers describing the decision response itself. They are
/// never merged into the reply; hyper frames the reply on its own.
pub const HOP_BY_HOP_HEADERS: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "content-length",
];

/// Immutable set of header names copied from the inbound probe onto the
/// decision request.
///
/// Built once at startup and shared behind an `Arc`; it is never mutated
/// afterwards, so concurrent readers need no synchronization.
#[derive(Clone, Debug)]
pub struct HeaderAllowlist {
    // Keyed by the name as configured, so membership is case-sensitive.
    names: BTreeMap<String, HeaderName>,
}

impl HeaderAllowlist {
    /// Build the allowlist from the configured names plus the four
    /// forwarded-metadata headers. Names that are not valid HTTP header
    /// names are skipped with a warning.
    pub fn build(configured: &[String]) -> Self {
        let mut names = BTreeMap::new();
        for name in configured.iter().map(String::as_str).chain(FORWARDED_HEADERS) {
            match HeaderName::from_bytes(name.as_bytes()) {
                Ok(header) => {
                    names.insert(name.to_string(), header);
                }
                Err(_) => warn!(header = name, "Skipping invalid header name in allowlist"),
            }
        }
        Self { names }
    }

    /// Like [`HeaderAllowlist::build`], but rejects invalid header names
    /// instead of skipping them.
    pub fn try_build(configured: &[String]) -> Result<Self> {
        if let Some(bad) = configured
            .iter()
            .find(|name| HeaderName::from_bytes(name.as_bytes()).is_err())
        {
            return Err(ForwarderError::InvalidConfiguration(format!(
                "invalid header name in allowlist: {:?}",
                bad
            )));
        }
        Ok(Self::build(configured))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Names as configured, in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.names.keys().map(String::as_str)
    }

    fn header_names(&self) -> impl Iterator<Item = &HeaderName> {
        self.names.values()
    }
}

/// Description of the original client request, as reported by the reverse
/// proxy in the forwarded-metadata headers. Absent headers read as empty.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ForwardedDescriptor {
    pub proto: String,
    pub host: String,
    pub uri: String,
    pub method: String,
}

impl ForwardedDescriptor {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let read = |name: &str| {
            headers
                .get(name)
                .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
                .unwrap_or_default()
        };

        Self {
            proto: read(X_FORWARDED_PROTO),
            host: read(X_FORWARDED_HOST),
            uri: read(X_FORWARDED_URI),
            method: read(X_FORWARDED_METHOD),
        }
    }

    /// Fails if the host or URI needed to address the decision service is missing.
    pub fn require_target(&self) -> Result<()> {
        if self.host.is_empty() {
            return Err(ForwarderError::MissingForwardedHeader(X_FORWARDED_HOST));
        }
        if self.uri.is_empty() {
            return Err(ForwarderError::MissingForwardedHeader(X_FORWARDED_URI));
        }
        Ok(())
    }
}

/// Copy every allowlisted header that is present and non-empty on `from`
/// onto `to`, replacing any value `to` already holds for that name.
pub fn copy_allowlisted(allowlist: &HeaderAllowlist, from: &HeaderMap, to: &mut HeaderMap) {
    for name in allowlist.header_names() {
        if let Some(value) = from.get(name) {
            if !value.is_empty() {
                to.insert(name.clone(), value.clone());
            }
        }
    }
}

/// Merge `from` into `to` without overwriting: a header `to` already carries
/// with a non-empty value is kept. Multiple values are joined with `,`.
/// Headers in [`HOP_BY_HOP_HEADERS`] are skipped.
pub fn merge_first_write_wins(from: &HeaderMap, to: &mut HeaderMap) {
    for name in from.keys() {
        if HOP_BY_HOP_HEADERS.contains(&name.as_str()) {
            continue;
        }
        if to.get(name).is_some_and(|existing| !existing.is_empty()) {
            continue;
        }

        let joined = from
            .get_all(name)
            .iter()
            .map(HeaderValue::as_bytes)
            .collect::<Vec<_>>()
            .join(&b","[..]);

        match HeaderValue::from_bytes(&joined) {
            Ok(value) => {
                to.insert(name.clone(), value);
            }
            Err(e) => warn!(header = %name, error = %e, "Dropping unmergeable decision header"),
        }
    }
}
