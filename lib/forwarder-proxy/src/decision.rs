//! Decision request construction

use forwarder_core::{ForwardedDescriptor, ForwarderError, Result};
use hyper::header::HeaderMap;
use hyper::{Method, Uri};

/// Outbound probe sent to the decision service. Carries no body.
#[derive(Clone, Debug)]
pub struct DecisionRequest {
    pub method: Method,
    /// Target URL exactly as concatenated
    pub url: String,
    pub headers: HeaderMap,
}

/// Build the decision request for an inbound probe.
///
/// The target is `{base_url}/{host}{uri}` by plain concatenation, so the
/// forwarded host becomes a path segment on the decision service. Headers
/// are left empty; the allowlisted copy is a separate step.
pub fn build_decision_request(
    method: &Method,
    descriptor: &ForwardedDescriptor,
    base_url: &str,
) -> Result<DecisionRequest> {
    let url = build_target_url(base_url, &descriptor.host, &descriptor.uri);

    let uri = url
        .parse::<Uri>()
        .map_err(|e| ForwarderError::RequestConstruction {
            url: url.clone(),
            reason: e.to_string(),
        })?;
    if uri.scheme().is_none() || uri.authority().is_none() {
        return Err(ForwarderError::RequestConstruction {
            url,
            reason: "target is not an absolute URL".to_string(),
        });
    }

    Ok(DecisionRequest {
        method: method.clone(),
        url,
        headers: HeaderMap::new(),
    })
}

/// Build the target URL for a forwarded host and URI
pub fn build_target_url(base_url: &str, host: &str, uri: &str) -> String {
    format!("{}/{}{}", base_url, host, uri)
}
