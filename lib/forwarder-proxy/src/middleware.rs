//! Middleware framework for request instrumentation

use forwarder_core::headers::X_FORWARDED_HOST;
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::http::request::Parts;
use hyper::{Method, Response};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use anyhow::Result;
use tracing::{debug, info, span, warn, Instrument, Level};

/// Context passed through middleware chain
#[derive(Clone, Debug)]
pub struct MiddlewareContext {
    /// Request path
    pub path: String,
    /// Request method
    pub method: String,
    /// Destination host reported by the reverse proxy (empty if absent)
    pub destination: String,
    /// When the request entered the chain
    pub started: Instant,
}

impl MiddlewareContext {
    pub fn new(method: &Method, path: &str, destination: &str) -> Self {
        Self {
            path: path.to_string(),
            method: method.to_string(),
            destination: destination.to_string(),
            started: Instant::now(),
        }
    }

    /// Create a new middleware context from request parts
    pub fn from_parts(parts: &Parts) -> Self {
        let destination = parts
            .headers
            .get(X_FORWARDED_HOST)
            .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
            .unwrap_or_default();

        Self::new(&parts.method, parts.uri.path(), &destination)
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

/// Middleware trait for observing requests and responses
#[async_trait::async_trait]
pub trait Middleware: Send + Sync {
    fn name(&self) -> &'static str {
        "UnnamedMiddleware"
    }

    /// Called before the request is handled
    async fn on_request(&self, _context: &MiddlewareContext) -> Result<()> {
        Ok(())
    }

    /// Called with the final status written to the caller
    async fn on_response(
        &self,
        _context: &MiddlewareContext,
        _status: u16,
    ) -> Result<()> {
        Ok(())
    }
}

/// Chain of middleware to execute in order
#[derive(Clone, Default)]
pub struct MiddlewareChain {
    middleware: Vec<Arc<dyn Middleware>>,
}

impl MiddlewareChain {
    /// Create a new middleware chain
    pub fn new() -> Self {
        Self {
            middleware: Vec::new(),
        }
    }

    /// Add middleware to the chain
    pub fn add<M: Middleware + 'static>(mut self, middleware: M) -> Self {
        self.middleware.push(Arc::new(middleware));
        self
    }

    pub fn len(&self) -> usize {
        self.middleware.len()
    }

    pub fn is_empty(&self) -> bool {
        self.middleware.is_empty()
    }

    /// Run `handler` inside the chain.
    ///
    /// Hook failures are logged and dropped; the response produced by
    /// `handler` is returned unchanged.
    pub async fn wrap<F>(&self, context: MiddlewareContext, handler: F) -> Response<Full<Bytes>>
    where
        F: Future<Output = Response<Full<Bytes>>>,
    {
        self.on_request(&context).await;
        let response = handler.await;
        self.on_response(&context, response.status().as_u16()).await;
        response
    }

    /// Process request through all middleware
    pub async fn on_request(&self, context: &MiddlewareContext) {
        for mw in &self.middleware {
            let span = span!(Level::DEBUG, "middleware", name = mw.name());
            if let Err(e) = mw.on_request(context).instrument(span).await {
                warn!("Middleware {} on_request error: {}", mw.name(), e);
            }
        }
    }

    /// Process response through all middleware (in reverse order)
    pub async fn on_response(&self, context: &MiddlewareContext, status: u16) {
        for mw in self.middleware.iter().rev() {
            let span = span!(Level::DEBUG, "middleware", name = mw.name());
            if let Err(e) = mw.on_response(context, status).instrument(span).await {
                warn!("Middleware {} on_response error: {}", mw.name(), e);
            }
        }
    }
}

/// Access log for every request
pub struct LoggingMiddleware;

#[async_trait::async_trait]
impl Middleware for LoggingMiddleware {
    fn name(&self) -> &'static str {
        "LoggingMiddleware"
    }

    async fn on_request(&self, context: &MiddlewareContext) -> Result<()> {
        debug!(method = %context.method, path = %context.path, "Request");
        Ok(())
    }

    async fn on_response(
        &self,
        context: &MiddlewareContext,
        status: u16,
    ) -> Result<()> {
        info!(
            method = %context.method,
            path = %context.path,
            status,
            duration_ms = context.elapsed().as_millis() as u64,
            "Response"
        );
        Ok(())
    }
}
