//! Reconciliation metrics and the probe server.
//!
//! Serves `/metrics` in the Prometheus text format plus `/healthz` and
//! `/readyz` for the kubelet.

use crate::error::ControllerError;
use axum::{http::StatusCode, routing::get, Router};
use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Counters and histograms recorded by the reconcile loop
#[derive(Debug, Clone)]
pub struct Metrics {
    registry: Registry,
    reconciliations: IntCounter,
    failures: IntCounterVec,
    duration: Histogram,
}

impl Metrics {
    /// Create and register all metrics
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let reconciliations = IntCounter::with_opts(Opts::new(
            "reconcile_total",
            "Number of TinkerbellMachine reconciliations",
        ))?;
        let failures = IntCounterVec::new(
            Opts::new("reconcile_errors_total", "Number of failed reconciliations by reason"),
            &["kind"],
        )?;
        let duration = Histogram::with_opts(
            HistogramOpts::new("reconcile_duration_seconds", "Time spent in one reconciliation")
                .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
        )?;

        registry.register(Box::new(reconciliations.clone()))?;
        registry.register(Box::new(failures.clone()))?;
        registry.register(Box::new(duration.clone()))?;

        Ok(Self {
            registry,
            reconciliations,
            failures,
            duration,
        })
    }

    /// Record one finished reconciliation
    pub fn observe(&self, elapsed: Duration, result: Result<(), &ControllerError>) {
        self.reconciliations.inc();
        self.duration.observe(elapsed.as_secs_f64());
        if let Err(e) = result {
            self.failures.with_label_values(&[e.reason()]).inc();
        }
    }

    /// Render all metrics in the Prometheus text format
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

async fn metrics_handler(metrics: Arc<Metrics>) -> Result<String, StatusCode> {
    metrics.render().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

/// Build the probe router
pub fn router(metrics: Arc<Metrics>) -> Router {
    Router::new()
        .route(
            "/metrics",
            get({
                let metrics = Arc::clone(&metrics);
                || metrics_handler(metrics)
            }),
        )
        .route("/healthz", get(|| async { "ok" }))
        .route("/readyz", get(|| async { "ok" }))
}

/// Serve metrics and probes until the listener fails
pub async fn serve(addr: SocketAddr, metrics: Arc<Metrics>) -> Result<(), ControllerError> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ControllerError::InvalidConfig(format!("cannot bind probe address {}: {}", addr, e)))?;
    info!("Serving metrics and probes on {}", addr);
    axum::serve(listener, router(metrics))
        .await
        .map_err(|e| ControllerError::Watch(format!("probe server stopped: {}", e)))
}
