//! Route dispatch for the forwarder's HTTP surface

use hyper::Method;

/// Prefix under which every request is a forward-auth probe
pub const DECISION_ROUTE: &str = "/decision/*";
pub const HEALTH_ROUTE: &str = "/health";
pub const METRICS_ROUTE: &str = "/metrics";

/// Where an inbound request goes
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Route {
    /// Forward-auth probe, any method
    Decision,
    Health,
    Metrics,
    /// Known path, wrong method
    MethodNotAllowed,
    NotFound,
}

impl Route {
    /// Resolve a request method and path to a route
    pub fn resolve(method: &Method, path: &str) -> Self {
        if match_path(path, DECISION_ROUTE) {
            return Route::Decision;
        }

        let route = if match_path(path, HEALTH_ROUTE) {
            Route::Health
        } else if match_path(path, METRICS_ROUTE) {
            Route::Metrics
        } else {
            return Route::NotFound;
        };

        if method == Method::GET || method == Method::HEAD {
            route
        } else {
            Route::MethodNotAllowed
        }
    }

    /// Whether requests on this route are counted by the metrics middleware
    pub fn is_instrumented(&self) -> bool {
        matches!(self, Route::Decision)
    }
}

/// Match a request path against a route pattern
pub fn match_path(path: &str, pattern: &str) -> bool {
    // Exact match
    if pattern == path {
        return true;
    }

    // Prefix match with wildcard
    if let Some(prefix) = pattern.strip_suffix("/*") {
        return path == prefix || path.starts_with(&format!("{}/", prefix));
    }

    false
}
