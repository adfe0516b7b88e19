//! Prometheus metrics infrastructure with one-time initialization.
//!
//! The recorder is installed once per process and shared by every service.
//! `init_test()` tolerates concurrent initialization from test threads.

use axum::{Extension, Router, routing::get};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use snafu::prelude::*;
use std::net::SocketAddr;
use std::sync::OnceLock;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::error::{AlreadyInitializedSnafu, MetricsError, NotInitializedSnafu, PrometheusInitSnafu};

/// Default metrics address.
pub const DEFAULT_METRICS_ADDR: &str = "0.0.0.0:9090";

/// Histogram buckets for duration metrics (seconds). Asset runs can take minutes.
const DURATION_BUCKETS: &[f64] = &[
    0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 300.0, 900.0,
];

static CONTROLLER: OnceLock<MetricsController> = OnceLock::new();

/// Handle to the installed Prometheus recorder.
pub struct MetricsController {
    handle: PrometheusHandle,
}

/// Install the recorder and serve `/metrics` and `/health` on `addr`.
pub fn init_global(addr: SocketAddr) -> Result<(), MetricsError> {
    init_without_endpoint()?;
    tokio::spawn(run_server(addr));

    info!(%addr, "Metrics server started");
    Ok(())
}

/// Install the recorder without an HTTP endpoint. Safe to call repeatedly.
pub fn init_test() {
    if init_without_endpoint().is_err() {
        while CONTROLLER.get().is_none() {
            std::hint::spin_loop();
        }
    }
}

/// Install the recorder only; used by one-shot runs that exit when done.
pub fn init_without_endpoint() -> Result<(), MetricsError> {
    let builder = PrometheusBuilder::new()
        .set_buckets(DURATION_BUCKETS)
        .context(PrometheusInitSnafu)?;
    let handle = builder.install_recorder().context(PrometheusInitSnafu)?;

    CONTROLLER
        .set(MetricsController { handle })
        .map_err(|_| AlreadyInitializedSnafu.build())
}

impl MetricsController {
    pub fn get() -> Result<&'static Self, MetricsError> {
        CONTROLLER.get().context(NotInitializedSnafu)
    }

    /// Render metrics in Prometheus text format.
    pub fn render(&self) -> String {
        self.handle.render()
    }
}

async fn run_server(addr: SocketAddr) {
    let Some(controller) = CONTROLLER.get() else {
        error!("Metrics server started before recorder was installed");
        return;
    };

    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler))
        .layer(Extension(controller.handle.clone()));

    let listener = match TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            error!("Failed to bind metrics server to {}: {}", addr, e);
            return;
        }
    };

    if let Err(e) = axum::serve(listener, app).await {
        error!("Metrics server error: {}", e);
    }
}

async fn metrics_handler(Extension(handle): Extension<PrometheusHandle>) -> String {
    handle.render()
}

async fn health_handler() -> &'static str {
    "ok\n"
}
