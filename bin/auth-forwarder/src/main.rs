use anyhow::{Context, Result};
use clap::Parser;
use forwarder_core::{ForwarderConfig, HeaderAllowlist};
use forwarder_proxy::http::{empty_response, method_not_allowed_response, not_found_response, text_response};
use forwarder_proxy::{
    DecisionClient, DecisionHandler, LoggingMiddleware, MetricsCollector, MetricsMiddleware,
    MiddlewareChain, MiddlewareContext,
};
use http_body_util::Full;
use hyper::{
    body::{Bytes, Incoming},
    server::conn::http1,
    service::service_fn,
    Request, Response, StatusCode,
};
use hyper_util::rt::TokioIo;
use hyper_util::server::graceful::GracefulShutdown;
use std::convert::Infallible;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

mod cli;
mod router;

use cli::{Cli, LogFormat};
use router::Route;

/// Time past the decision timeout that open connections get to finish once a
/// stop signal arrives
const DRAIN_MARGIN: Duration = Duration::from_secs(5);

/// Shared state for every connection
struct App {
    handler: DecisionHandler,
    metrics: MetricsCollector,
    /// Logging and metrics, for forward-auth probes
    decision_chain: MiddlewareChain,
    /// Logging only, for everything else
    access_chain: MiddlewareChain,
}

impl App {
    /// Build the shared state; any failure here is fatal at startup
    fn new(config: &ForwarderConfig) -> Result<Self> {
        let allowlist = Arc::new(HeaderAllowlist::try_build(&config.headers)?);
        let client = DecisionClient::from_config(config)?;

        let metrics = MetricsCollector::new().context("failed to initialize metrics")?;
        info!("Metrics collector initialized");

        info!(
            forward_url = %config.forward_address,
            headers = ?allowlist.names().collect::<Vec<_>>(),
            "Created routes"
        );

        Ok(Self {
            handler: DecisionHandler::new(config, allowlist, client),
            decision_chain: MiddlewareChain::new()
                .add(LoggingMiddleware)
                .add(MetricsMiddleware::new(metrics.clone())),
            access_chain: MiddlewareChain::new().add(LoggingMiddleware),
            metrics,
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_format);

    info!("Starting auth-forwarder...");

    let config = cli.load_config()?;
    config.validate().context("invalid configuration")?;

    let app = Arc::new(App::new(&config)?);

    let addr = config.socket_addr()?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!(address = %addr, "Starting server");

    serve(listener, app, tokio::signal::ctrl_c(), config.timeout + DRAIN_MARGIN).await;

    Ok(())
}

/// Accept connections until `shutdown` resolves, then wait up to `drain` for
/// open connections to finish their in-flight requests.
async fn serve<S>(listener: TcpListener, app: Arc<App>, shutdown: S, drain: Duration)
where
    S: Future,
{
    let graceful = GracefulShutdown::new();
    tokio::pin!(shutdown);

    loop {
        let (stream, peer_addr) = tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok(conn) => conn,
                Err(e) => {
                    warn!("Error accepting connection: {}", e);
                    continue;
                }
            },
            _ = &mut shutdown => {
                info!("Shutdown signal received, no longer accepting connections");
                break;
            }
        };

        let io = TokioIo::new(stream);
        let app = app.clone();
        let service = service_fn(move |req| handle_request(req, app.clone()));
        let connection = graceful.watch(http1::Builder::new().serve_connection(io, service));

        tokio::task::spawn(async move {
            if let Err(e) = connection.await {
                debug!("Error serving HTTP connection from {}: {}", peer_addr, e);
            }
        });
    }

    drop(listener);

    tokio::select! {
        _ = graceful.shutdown() => info!("All connections closed"),
        _ = tokio::time::sleep(drain) => {
            warn!(drain = ?drain, "Timed out waiting for connections to close");
        }
    }
}

fn init_logging(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

async fn handle_request(
    req: Request<Incoming>,
    app: Arc<App>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    // Probes carry no body worth reading
    let (parts, _body) = req.into_parts();
    let context = MiddlewareContext::from_parts(&parts);
    let route = Route::resolve(&parts.method, parts.uri.path());

    let chain = if route.is_instrumented() {
        &app.decision_chain
    } else {
        &app.access_chain
    };

    let response = match route {
        Route::Decision => chain.wrap(context, app.handler.handle(&parts)).await,
        Route::Health => chain.wrap(context, async { empty_response(StatusCode::OK) }).await,
        Route::Metrics => chain.wrap(context, async { metrics_response(&app.metrics) }).await,
        Route::MethodNotAllowed => chain.wrap(context, async { method_not_allowed_response() }).await,
        Route::NotFound => chain.wrap(context, async { not_found_response() }).await,
    };

    Ok(response)
}

fn metrics_response(metrics: &MetricsCollector) -> Response<Full<Bytes>> {
    match metrics.gather() {
        Ok(text) => text_response(StatusCode::OK, metrics.format_type(), text),
        Err(e) => {
            warn!("Failed to gather metrics: {}", e);
            empty_response(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}
