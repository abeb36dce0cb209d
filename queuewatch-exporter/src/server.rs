//! HTTP endpoints: `/metrics`, `/health` and an info page at `/`.

use std::convert::Infallible;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::header::CONTENT_TYPE;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use hyper_util::server::graceful::GracefulShutdown;
use prometheus::{Encoder, Registry, TextEncoder};
use tokio::net::TcpListener;

use queuewatch_adapters::QueueSource;

/// Default bound on draining open connections at shutdown.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// Default deadline for the broker check behind `/health`.
pub const DEFAULT_HEALTH_TIMEOUT: Duration = Duration::from_secs(10);

/// Pause after a failed `accept` before trying again.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

const INDEX_HTML: &str = "<html>
<head><title>RabbitMQ Custom Exporter</title></head>
<body>
<h1>RabbitMQ Custom Prometheus Exporter</h1>
<p>Exports per-queue health, state and alert metrics for RabbitMQ.</p>
<p><a href=\"/metrics\">Metrics</a></p>
<p><a href=\"/health\">Health</a></p>
</body>
</html>
";

/// What the request handlers need.
#[derive(Debug)]
pub struct ServerState {
    /// Registry gathered on every `/metrics` request.
    pub registry: Registry,
    /// Broker checked by `/health`.
    pub source: Arc<dyn QueueSource>,
    /// Deadline for the `/health` broker check.
    pub health_timeout: Duration,
}

impl ServerState {
    pub fn new(registry: Registry, source: Arc<dyn QueueSource>) -> Self {
        Self {
            registry,
            source,
            health_timeout: DEFAULT_HEALTH_TIMEOUT,
        }
    }

    pub fn with_health_timeout(mut self, timeout: Duration) -> Self {
        self.health_timeout = timeout;
        self
    }
}

/// Serve requests on `listener` until `shutdown` resolves.
///
/// Once it does, the listener is closed and open connections get up to
/// `grace` to finish before they are dropped.
pub async fn serve(
    listener: TcpListener,
    state: Arc<ServerState>,
    shutdown: impl Future<Output = ()>,
    grace: Duration,
) {
    let graceful = GracefulShutdown::new();
    tokio::pin!(shutdown);

    if let Ok(addr) = listener.local_addr() {
        tracing::info!(%addr, "serving metrics");
    }

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(accepted) => accepted,
                    Err(err) => {
                        tracing::warn!(error = %err, "failed to accept connection");
                        // Errors like EMFILE persist until connections close
                        tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                        continue;
                    }
                };

                let state = state.clone();
                let service = service_fn(move |req| handle_request(req, state.clone()));
                let connection = http1::Builder::new().serve_connection(TokioIo::new(stream), service);
                let connection = graceful.watch(connection);

                tokio::spawn(async move {
                    if let Err(err) = connection.await {
                        tracing::debug!(%peer, error = %err, "connection error");
                    }
                });
            }
            _ = &mut shutdown => break,
        }
    }

    drop(listener);
    tracing::info!("shutting down HTTP server");

    match tokio::time::timeout(grace, graceful.shutdown()).await {
        Ok(()) => tracing::info!("all connections closed"),
        Err(_) => tracing::warn!(
            grace_secs = grace.as_secs(),
            "timed out waiting for connections to close"
        ),
    }
}

async fn handle_request(
    req: Request<hyper::body::Incoming>,
    state: Arc<ServerState>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let response = match req.uri().path() {
        "/metrics" => metrics(&state.registry),
        "/health" => health(&state).await,
        "/" => respond(StatusCode::OK, "text/html; charset=utf-8", INDEX_HTML),
        _ => respond(StatusCode::NOT_FOUND, "text/plain", "Not Found"),
    };
    Ok(response)
}

fn metrics(registry: &Registry) -> Response<Full<Bytes>> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();

    match encoder.encode(&registry.gather(), &mut buffer) {
        Ok(()) => respond(StatusCode::OK, encoder.format_type(), buffer),
        Err(err) => {
            tracing::error!(error = %err, "failed to encode metrics");
            respond(
                StatusCode::INTERNAL_SERVER_ERROR,
                "text/plain",
                "failed to encode metrics",
            )
        }
    }
}

async fn health(state: &ServerState) -> Response<Full<Bytes>> {
    match state.source.health_check(state.health_timeout).await {
        Ok(()) => respond(StatusCode::OK, "text/plain", "OK"),
        Err(err) => {
            tracing::warn!(error = %err, "health check failed");
            respond(
                StatusCode::SERVICE_UNAVAILABLE,
                "text/plain",
                format!("Service Unavailable: {err}"),
            )
        }
    }
}

fn respond(
    status: StatusCode,
    content_type: &str,
    body: impl Into<Bytes>,
) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    if let Ok(value) = content_type.parse() {
        response.headers_mut().insert(CONTENT_TYPE, value);
    }
    response
}
