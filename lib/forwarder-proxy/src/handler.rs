//! Forward-auth decision handler
//!
//! Turns one forward-auth probe into one decision call and one reply. Each
//! invocation is independent: the only shared state is the read-only
//! allowlist and the client's connection pool.

use crate::decision::build_decision_request;
use crate::forwarder::DecisionClient;
use crate::interpreter::{interpret, Decision};
use forwarder_core::headers::copy_allowlisted;
use forwarder_core::{ForwardedDescriptor, ForwarderConfig, HeaderAllowlist};
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::header::HeaderMap;
use hyper::http::request::Parts;
use hyper::Response;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct DecisionHandler {
    decision_url: String,
    redirect_url: String,
    require_forwarded_headers: bool,
    allowlist: Arc<HeaderAllowlist>,
    client: DecisionClient,
}

impl DecisionHandler {
    pub fn new(config: &ForwarderConfig, allowlist: Arc<HeaderAllowlist>, client: DecisionClient) -> Self {
        Self {
            decision_url: config.forward_address.clone(),
            redirect_url: config.redirect_url.clone(),
            require_forwarded_headers: config.require_forwarded_headers,
            allowlist,
            client,
        }
    }

    /// Handle a forward-auth probe. Always produces a reply.
    pub async fn handle(&self, parts: &Parts) -> Response<Full<Bytes>> {
        self.decide(parts).await.into_response(HeaderMap::new())
    }

    /// Run the probe against the decision service and return the outcome
    pub async fn decide(&self, parts: &Parts) -> Decision {
        debug!(headers = ?parts.headers, "Incoming request");

        let descriptor = ForwardedDescriptor::from_headers(&parts.headers);
        if self.require_forwarded_headers {
            if let Err(e) = descriptor.require_target() {
                warn!(error = %e, "Rejecting request without forwarded target");
                return Decision::failed(e);
            }
        }

        let mut request = match build_decision_request(&parts.method, &descriptor, &self.decision_url) {
            Ok(request) => request,
            Err(e) => {
                warn!(
                    error = %e,
                    host = %descriptor.host,
                    uri = %descriptor.uri,
                    "Error processing request"
                );
                return Decision::failed(e);
            }
        };
        copy_allowlisted(&self.allowlist, &parts.headers, &mut request.headers);

        info!(url = %request.url, "Performing forward request");

        let response = match self.client.send(request).await {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "Error forwarding request");
                return Decision::failed(e);
            }
        };

        info!(
            code = response.status.as_u16(),
            headers = ?response.headers,
            "Auth response"
        );

        let decision = interpret(response, &self.redirect_url);
        match &decision {
            Decision::Failed { error } => warn!(error = %error, "Error reading decision response"),
            other => info!(outcome = other.outcome(), "Decision response"),
        }
        decision
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{MetricsCollector, MetricsMiddleware};
    use crate::middleware::{MiddlewareChain, MiddlewareContext};
    use crate::testing::{closed_port_url, start_delayed_decision_server, start_mock_decision_server};
    use forwarder_core::headers::{X_FORWARDED_HOST, X_FORWARDED_METHOD, X_FORWARDED_PROTO, X_FORWARDED_URI};
    use http_body_util::BodyExt;
    use hyper::header::{CONNECTION, CONTENT_LENGTH, LOCATION};
    use hyper::{Request, StatusCode};
    use std::time::{Duration, Instant};

    const REDIRECT: &str = "https://login.example.com/";

    fn handler(decision_url: &str, require_forwarded_headers: bool) -> DecisionHandler {
        let config = ForwarderConfig {
            forward_address: decision_url.to_string(),
            redirect_url: REDIRECT.to_string(),
            headers: vec!["Authorization".to_string(), "Cookie".to_string()],
            timeout: Duration::from_secs(5),
            require_forwarded_headers,
            ..Default::default()
        };
        let allowlist = Arc::new(HeaderAllowlist::build(&config.headers));
        let client = DecisionClient::from_config(&config).expect("client should build");
        DecisionHandler::new(&config, allowlist, client)
    }

    fn forward_auth_request(host: &str, uri: &str) -> Parts {
        Request::builder()
            .method("GET")
            .uri("/decision/")
            .header(X_FORWARDED_PROTO, "https")
            .header(X_FORWARDED_HOST, host)
            .header(X_FORWARDED_URI, uri)
            .header(X_FORWARDED_METHOD, "POST")
            .header("Authorization", "Bearer abc")
            .header("User-Agent", "traefik")
            .body(())
            .unwrap()
            .into_parts()
            .0
    }

    async fn read_body(response: Response<Full<Bytes>>) -> Bytes {
        response.into_body().collect().await.unwrap().to_bytes()
    }

    #[tokio::test]
    async fn test_allow_relays_decision_headers() {
        let server = start_mock_decision_server(
            "HTTP/1.1 200 OK\r\nX-Foo: bar\r\nContent-Length: 2\r\nConnection: close\r\n\r\nOK",
        )
        .await;

        let response = handler(&server.url, false).handle(&forward_auth_request("app.example.com", "/")).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers().get("x-foo").unwrap(), "bar");
        assert!(response.headers().get(CONNECTION).is_none());
        assert!(response.headers().get(CONTENT_LENGTH).is_none());
        assert!(read_body(response).await.is_empty());
    }

    #[tokio::test]
    async fn test_decision_request_shape() {
        let mut server = start_mock_decision_server(
            "HTTP/1.1 200 OK\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        )
        .await;
        let url = format!("{}/check", server.url);

        handler(&url, false)
            .handle(&forward_auth_request("app.example.com", "/dashboard?tab=1"))
            .await;

        let captured = server.requests.recv().await.expect("request should be captured");
        let lower = captured.to_lowercase();
        assert!(
            captured.starts_with("GET /check/app.example.com/dashboard?tab=1 HTTP/1.1\r\n"),
            "got {captured}"
        );
        assert!(lower.contains("authorization: bearer abc"));
        assert!(lower.contains("x-forwarded-host: app.example.com"));
        assert!(lower.contains("x-forwarded-uri: /dashboard?tab=1"));
        assert!(lower.contains("x-forwarded-proto: https"));
        assert!(lower.contains("x-forwarded-method: post"));
        assert!(!lower.contains("user-agent: traefik"));
    }

    #[tokio::test]
    async fn test_unauthorized_redirects_to_login() {
        let server = start_mock_decision_server(
            "HTTP/1.1 401 Unauthorized\r\nLocation: https://elsewhere\r\nContent-Length: 6\r\nConnection: close\r\n\r\ndenied",
        )
        .await;

        let response = handler(&server.url, false).handle(&forward_auth_request("app.example.com", "/")).await;

        assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
        assert_eq!(response.headers().get(LOCATION).unwrap(), REDIRECT);
        assert!(read_body(response).await.is_empty());
    }

    #[tokio::test]
    async fn test_forbidden_is_passed_through() {
        let server = start_mock_decision_server(
            "HTTP/1.1 403 Forbidden\r\nX-Foo: bar\r\nContent-Length: 9\r\nConnection: close\r\n\r\nforbidden",
        )
        .await;

        let response = handler(&server.url, false).handle(&forward_auth_request("app.example.com", "/")).await;

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert!(response.headers().get("x-foo").is_none());
        assert_eq!(&read_body(response).await[..], b"forbidden");
    }

    #[tokio::test]
    async fn test_transport_error_is_500_and_counted_once() {
        let collector = MetricsCollector::new().unwrap();
        let chain = MiddlewareChain::new().add(MetricsMiddleware::new(collector.clone()));
        let handler = handler(&closed_port_url().await, false);

        let parts = forward_auth_request("app.example.com", "/");
        let response = chain
            .wrap(MiddlewareContext::from_parts(&parts), handler.handle(&parts))
            .await;

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(collector.request_count("app.example.com", 500), 1);
        assert_eq!(collector.http_request_duration_seconds.get_sample_count(), 1);
    }

    #[tokio::test]
    async fn test_invalid_target_is_500_without_call() {
        let mut server = start_mock_decision_server(
            "HTTP/1.1 200 OK\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        )
        .await;

        let response = handler(&server.url, false).handle(&forward_auth_request("bad host", "/")).await;

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(server.requests.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_missing_forwarded_headers_proceed_by_default() {
        let mut server = start_mock_decision_server(
            "HTTP/1.1 200 OK\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        )
        .await;
        let (parts, _) = Request::builder().uri("/decision/").body(()).unwrap().into_parts();

        let response = handler(&server.url, false).handle(&parts).await;

        assert_eq!(response.status(), StatusCode::OK);
        let captured = server.requests.recv().await.unwrap();
        assert!(captured.starts_with("GET / HTTP/1.1\r\n"), "got {captured}");
    }

    #[tokio::test]
    async fn test_missing_forwarded_headers_rejected_when_required() {
        let mut server = start_mock_decision_server(
            "HTTP/1.1 200 OK\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        )
        .await;
        let (parts, _) = Request::builder().uri("/decision/").body(()).unwrap().into_parts();

        let response = handler(&server.url, true).handle(&parts).await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(server.requests.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_repeated_requests_yield_identical_replies() {
        let server = start_mock_decision_server(
            "HTTP/1.1 418 I'm a teapot\r\nContent-Length: 6\r\nConnection: close\r\n\r\nteapot",
        )
        .await;
        let handler = handler(&server.url, false);
        let parts = forward_auth_request("app.example.com", "/brew");

        let first = handler.handle(&parts).await;
        let second = handler.handle(&parts).await;

        assert_eq!(first.status(), second.status());
        assert_eq!(first.headers(), second.headers());
        assert_eq!(read_body(first).await, read_body(second).await);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_requests_do_not_serialize() {
        const REQUESTS: usize = 16;
        let delay = Duration::from_millis(300);
        let server = start_delayed_decision_server(
            "HTTP/1.1 200 OK\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
            delay,
        )
        .await;

        let collector = MetricsCollector::new().unwrap();
        let chain = MiddlewareChain::new().add(MetricsMiddleware::new(collector.clone()));
        let handler = Arc::new(handler(&server.url, false));

        let started = Instant::now();
        let tasks: Vec<_> = (0..REQUESTS)
            .map(|i| {
                let chain = chain.clone();
                let handler = handler.clone();
                tokio::spawn(async move {
                    let parts = forward_auth_request("app.example.com", &format!("/item/{i}"));
                    chain
                        .wrap(MiddlewareContext::from_parts(&parts), handler.handle(&parts))
                        .await
                        .status()
                })
            })
            .collect();

        for task in tasks {
            assert_eq!(task.await.unwrap(), StatusCode::OK);
        }
        let elapsed = started.elapsed();

        assert!(elapsed < delay * 4, "requests were serialized: took {elapsed:?}");
        assert_eq!(collector.request_count("app.example.com", 200), REQUESTS as u64);
        assert_eq!(
            collector.http_request_duration_seconds.get_sample_count(),
            REQUESTS as u64
        );
    }
}
