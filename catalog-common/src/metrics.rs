//! Tiny `/metrics` + `/healthz` exporter, generalized from the teacher's
//! per-request HTTP layer into per-component reconcile/queue gauges and
//! histograms (`SPEC_FULL.md` §1): each sync handler records a counter for
//! the outcome and a histogram for the handler's own duration, rather than
//! the teacher's inbound-request instrumentation (there is no inbound HTTP
//! surface here — the operator is a client, not a server, per `spec.md` §6).

use std::sync::OnceLock;
use std::time::Instant;

use axum::{Router, routing::get};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use owo_colors::OwoColorize;
use tokio::net::TcpListener;

use crate::shutdown::shutdown_signal;

static PROM_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();
static SERVER_STARTED: OnceLock<()> = OnceLock::new();

fn install_recorder_once() -> &'static PrometheusHandle {
    PROM_HANDLE.get_or_init(|| {
        PrometheusBuilder::new()
            .install_recorder()
            .expect("install global metrics recorder")
    })
}

/// Spawns the metrics server once per process if `METRICS_PORT` is set.
/// Safe to call redundantly (e.g. once per component) — only the first
/// caller wins.
pub fn maybe_spawn_metrics_server(default_port: u16) {
    let port = metric_port_env().unwrap_or(default_port);

    if SERVER_STARTED.set(()).is_ok() {
        let _ = install_recorder_once();
        tokio::spawn(run_metrics_server(port));
    }
}

pub async fn run_metrics_server(port: u16) {
    let handle = install_recorder_once().clone();
    let metrics_route = {
        let handle = handle.clone();
        get(move || async move { handle.render() })
    };
    let app = Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .route("/readyz", get(|| async { "ok" }))
        .route("/metrics", metrics_route);
    let addr = format!("0.0.0.0:{}", port);
    let listener = match TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!(%addr, error = %e, "failed to bind metrics server");
            return;
        }
    };
    println!(
        "{}{}",
        "📈 starting metrics server • port=".green(),
        port.to_string().green().dimmed(),
    );
    let started = Instant::now();
    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        tracing::error!(error = %e, "metrics server exited with error");
    }
    tracing::info!(uptime = ?started.elapsed(), "metrics server stopped gracefully");
}

fn metric_port_env() -> Option<u16> {
    std::env::var("METRICS_PORT").ok().and_then(|s| s.parse().ok())
}

/// Increments `<name>_total{component, outcome}` and observes
/// `<name>_duration_seconds{component}` in one call, the shape every sync
/// handler in the five components uses.
pub fn record_sync(component: &'static str, outcome: &'static str, elapsed_secs: f64) {
    metrics::counter!("catalog_operator_sync_total", "component" => component, "outcome" => outcome).increment(1);
    metrics::histogram!("catalog_operator_sync_duration_seconds", "component" => component).record(elapsed_secs);
}

/// Sets `catalog_operator_queue_depth{queue}`, sampled by each worker pool
/// after every `take(key)`.
pub fn set_queue_depth(queue: &'static str, depth: f64) {
    metrics::gauge!("catalog_operator_queue_depth", "queue" => queue).set(depth);
}
