//! Forward-auth decision pipeline
pub mod decision;
pub mod forwarder;
pub mod handler;
pub mod http;
pub mod interpreter;
pub mod metrics;
pub mod middleware;

#[cfg(test)]
mod testing;

pub use decision::{build_decision_request, DecisionRequest};
pub use forwarder::{DecisionClient, DecisionResponse};
pub use handler::DecisionHandler;
pub use interpreter::{interpret, Decision};
pub use metrics::{MetricsCollector, MetricsMiddleware};
pub use middleware::{LoggingMiddleware, Middleware, MiddlewareChain, MiddlewareContext};
