//! Prometheus metrics definitions and HTTP server

use std::net::SocketAddr;

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use prometheus::{
    register_counter, register_counter_vec, register_gauge_vec, register_histogram_vec, Counter,
    CounterVec, Encoder, GaugeVec, HistogramVec, TextEncoder,
};
use tokio::net::TcpListener;
use tracing::{error, info};

lazy_static::lazy_static! {
    /// Total number of reconciliations
    pub static ref RECONCILIATIONS: CounterVec = register_counter_vec!(
        "s3_bucket_operator_reconciliations_total",
        "Total number of reconciliations",
        &["operation"]
    ).unwrap();

    /// Total number of reconciliation errors
    pub static ref RECONCILIATION_ERRORS: CounterVec = register_counter_vec!(
        "s3_bucket_operator_reconciliation_errors_total",
        "Total number of reconciliation errors",
        &["operation"]
    ).unwrap();

    /// Reconciliation duration histogram
    pub static ref RECONCILE_DURATION: HistogramVec = register_histogram_vec!(
        "s3_bucket_operator_reconcile_duration_seconds",
        "Duration of reconciliations in seconds",
        &["operation"],
        vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]
    ).unwrap();

    /// Per-backend operation outcomes
    pub static ref BACKEND_OPERATIONS: CounterVec = register_counter_vec!(
        "s3_bucket_operator_backend_operations_total",
        "Total number of per-backend bucket operations by outcome",
        &["operation", "backend", "outcome"]
    ).unwrap();

    /// Record writes rejected with a conflict and retried
    pub static ref PERSIST_CONFLICTS: Counter = register_counter!(
        "s3_bucket_operator_persist_conflicts_total",
        "Total number of bucket record writes retried after a conflict"
    ).unwrap();

    /// Buckets paused after converging
    pub static ref AUTO_PAUSES: Counter = register_counter!(
        "s3_bucket_operator_auto_pauses_total",
        "Total number of buckets paused after converging on every backend"
    ).unwrap();

    /// Buckets whose finalizer was released after backend cleanup
    pub static ref CLEANUPS: Counter = register_counter!(
        "s3_bucket_operator_cleanups_total",
        "Total number of buckets removed from every backend"
    ).unwrap();

    /// Registered backends by state
    pub static ref BACKENDS: GaugeVec = register_gauge_vec!(
        "s3_bucket_operator_backends",
        "Number of registered backends by state",
        &["state"]
    ).unwrap();

    /// Operator health (1 = healthy, 0 = unhealthy)
    pub static ref OPERATOR_HEALTH: prometheus::Gauge = prometheus::register_gauge!(
        "s3_bucket_operator_health",
        "Operator health status (1 = healthy, 0 = unhealthy)"
    ).unwrap();
}

/// Start the metrics HTTP server
pub async fn serve(port: u16) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    info!("Metrics server listening on {}", addr);

    // Set initial health
    OPERATOR_HEALTH.set(1.0);

    loop {
        let (stream, _) = listener.accept().await?;
        let io = TokioIo::new(stream);

        tokio::spawn(async move {
            if let Err(e) = http1::Builder::new()
                .serve_connection(io, service_fn(handle_request))
                .await
            {
                error!("Error serving connection: {}", e);
            }
        });
    }
}

/// Handle HTTP requests
async fn handle_request(
    req: Request<hyper::body::Incoming>,
) -> Result<Response<Full<Bytes>>, hyper::Error> {
    let response = match req.uri().path() {
        "/metrics" => metrics_response(),
        "/healthz" | "/health" => health_response(),
        "/readyz" | "/ready" => ready_response(),
        _ => not_found_response(),
    };

    Ok(response)
}

/// Generate metrics response
fn metrics_response() -> Response<Full<Bytes>> {
    match encode_metrics() {
        Ok((content_type, buffer)) => Response::builder()
            .status(StatusCode::OK)
            .header("Content-Type", content_type)
            .body(Full::new(Bytes::from(buffer)))
            .unwrap(),
        Err(e) => {
            error!("Failed to encode metrics: {}", e);
            Response::builder()
                .status(StatusCode::INTERNAL_SERVER_ERROR)
                .body(Full::new(Bytes::from("Failed to encode metrics")))
                .unwrap()
        }
    }
}

/// Encode every registered metric in the text exposition format
pub fn encode_metrics() -> Result<(String, Vec<u8>), prometheus::Error> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&prometheus::gather(), &mut buffer)?;
    Ok((encoder.format_type().to_string(), buffer))
}

/// Publish the number of active and inactive backends
pub fn record_backends(active: usize, inactive: usize) {
    BACKENDS.with_label_values(&["active"]).set(active as f64);
    BACKENDS.with_label_values(&["inactive"]).set(inactive as f64);
}

/// Health check response
fn health_response() -> Response<Full<Bytes>> {
    Response::builder()
        .status(StatusCode::OK)
        .body(Full::new(Bytes::from("ok")))
        .unwrap()
}

/// Readiness check response
fn ready_response() -> Response<Full<Bytes>> {
    Response::builder()
        .status(StatusCode::OK)
        .body(Full::new(Bytes::from("ok")))
        .unwrap()
}

/// Not found response
fn not_found_response() -> Response<Full<Bytes>> {
    Response::builder()
        .status(StatusCode::NOT_FOUND)
        .body(Full::new(Bytes::from("Not Found")))
        .unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registered_metrics_are_exposed() {
        BACKEND_OPERATIONS
            .with_label_values(&["create", "b1", "success"])
            .inc();
        PERSIST_CONFLICTS.inc();
        record_backends(2, 1);

        let (content_type, buffer) = encode_metrics().unwrap();
        let text = String::from_utf8(buffer).unwrap();
        assert!(content_type.starts_with("text/plain"));
        assert!(text.contains("s3_bucket_operator_backend_operations_total"));
        assert!(text.contains("s3_bucket_operator_persist_conflicts_total"));
        assert!(text.contains("s3_bucket_operator_backends{state=\"inactive\"} 1"));
    }
}
