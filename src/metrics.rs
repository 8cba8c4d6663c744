//! Prometheus metrics registry, built the way the teacher builds its own
//! in `watch.rs`: one process-wide [`Registry`] behind [`LazyLock`], one
//! `static` per metric, registered once on first access.

use std::net::SocketAddr;
use std::sync::LazyLock;

use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry, TextEncoder};
use tokio_util::sync::CancellationToken;
use tracing::info;

static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

pub static SCAN_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    let c = IntCounter::new("scanner_scan_total", "Total scan rounds completed").expect("metric definition is valid");
    REGISTRY.register(Box::new(c.clone())).expect("metric not yet registered");
    c
});

pub static SCAN_ERRORS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    let c = IntCounter::new("scanner_scan_errors_total", "Total scan rounds that failed to enumerate /proc").expect("metric definition is valid");
    REGISTRY.register(Box::new(c.clone())).expect("metric not yet registered");
    c
});

pub static SCAN_DURATION_SECONDS: LazyLock<Histogram> = LazyLock::new(|| {
    let h = Histogram::with_opts(HistogramOpts::new("scanner_scan_duration_seconds", "Duration of a single scan round")).expect("metric definition is valid");
    REGISTRY.register(Box::new(h.clone())).expect("metric not yet registered");
    h
});

pub static THREATS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    let c = IntCounterVec::new(Opts::new("scanner_threats_total", "Detected threats by app type and severity"), &["type", "severity"]).expect("metric definition is valid");
    REGISTRY.register(Box::new(c.clone())).expect("metric not yet registered");
    c
});

pub static SUSPICIOUS_PROCESSES_PER_NAMESPACE: LazyLock<IntGaugeVec> = LazyLock::new(|| {
    let g = IntGaugeVec::new(Opts::new("scanner_suspicious_processes", "Suspicious processes found in the most recent scan, per namespace"), &["namespace"]).expect("metric definition is valid");
    REGISTRY.register(Box::new(g.clone())).expect("metric not yet registered");
    g
});

pub static LABEL_OUTCOMES_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    let c = IntCounterVec::new(Opts::new("scanner_label_outcomes_total", "Namespace label actions by outcome"), &["result"]).expect("metric definition is valid");
    REGISTRY.register(Box::new(c.clone())).expect("metric not yet registered");
    c
});

pub static NOTIFICATIONS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    let c = IntCounterVec::new(Opts::new("scanner_notifications_total", "Consolidated alerts sent, by outcome"), &["result"]).expect("metric definition is valid");
    REGISTRY.register(Box::new(c.clone())).expect("metric not yet registered");
    c
});

pub static PROCESS_RESIDENT_MEMORY_BYTES: LazyLock<IntGauge> = LazyLock::new(|| {
    let g = IntGauge::new("scanner_process_resident_memory_bytes", "Resident memory of this process, sampled each scan round").expect("metric definition is valid");
    REGISTRY.register(Box::new(g.clone())).expect("metric not yet registered");
    g
});

pub static ACTIVE_WORKERS: LazyLock<IntGauge> = LazyLock::new(|| {
    let g = IntGauge::new("scanner_active_workers", "AnalyzeProcess worker tasks currently in flight").expect("metric definition is valid");
    REGISTRY.register(Box::new(g.clone())).expect("metric not yet registered");
    g
});

/// Samples `VmRSS` from `/proc/self/status`; best-effort, silently leaves
/// the gauge unchanged if unavailable (e.g. non-Linux dev environment).
pub async fn sample_process_memory() {
    if let Ok(raw) = tokio::fs::read_to_string("/proc/self/status").await {
        for line in raw.lines() {
            if let Some(rest) = line.strip_prefix("VmRSS:") {
                if let Some(kb) = rest.split_whitespace().next().and_then(|s| s.parse::<i64>().ok()) {
                    PROCESS_RESIDENT_MEMORY_BYTES.set(kb * 1024);
                }
                return;
            }
        }
    }
}

pub fn encode_text() -> Result<Vec<u8>, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(buffer)
}

async fn metrics_handler() -> impl IntoResponse {
    match encode_text() {
        Ok(body) => (StatusCode::OK, body),
        Err(_) => (StatusCode::INTERNAL_SERVER_ERROR, b"metrics encoding error".to_vec()),
    }
}

pub fn build_router(path: &str) -> Router {
    Router::new().route(path, get(metrics_handler))
}

pub async fn serve(addr: SocketAddr, path: String, ctx: CancellationToken) -> anyhow::Result<()> {
    let app = build_router(&path);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, path = %path, "metrics endpoint listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { ctx.cancelled().await })
        .await?;
    Ok(())
}
