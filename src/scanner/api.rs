//! Operator HTTP API: a read-only `/violations` endpoint plus the same
//! liveness/readiness/metrics probe shape the teacher's watch controller
//! exposes.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::violations::ViolationStore;

/// Flipped to `true` after the scanner completes its first scan round.
#[derive(Default)]
pub struct ReadinessFlag(AtomicBool);

impl ReadinessFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_ready(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_ready(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub fn build_router(store: Arc<ViolationStore>, readiness: Arc<ReadinessFlag>) -> Router {
    Router::new()
        .route("/violations", get(move || violations_handler(store.clone())))
        .route("/healthz", get(|| async { (StatusCode::OK, "OK") }))
        .route("/readyz", get(move || ready_handler(readiness.clone())))
}

async fn violations_handler(store: Arc<ViolationStore>) -> impl IntoResponse {
    Json(store.snapshot().await)
}

async fn ready_handler(readiness: Arc<ReadinessFlag>) -> impl IntoResponse {
    if readiness.is_ready() {
        (StatusCode::OK, "READY")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    }
}

pub async fn serve(addr: SocketAddr, store: Arc<ViolationStore>, readiness: Arc<ReadinessFlag>, ctx: CancellationToken) -> anyhow::Result<()> {
    let app = build_router(store, readiness);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "scanner operator api listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { ctx.cancelled().await })
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    #[tokio::test]
    async fn healthz_always_returns_ok() {
        let app = build_router(Arc::new(ViolationStore::new()), Arc::new(ReadinessFlag::new()));
        let response = app.oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap()).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn readyz_is_unavailable_until_marked_ready() {
        let readiness = Arc::new(ReadinessFlag::new());
        let app = build_router(Arc::new(ViolationStore::new()), readiness.clone());
        let response = app.oneshot(Request::builder().uri("/readyz").body(Body::empty()).unwrap()).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn readyz_is_ok_after_marked_ready() {
        let readiness = Arc::new(ReadinessFlag::new());
        readiness.mark_ready();
        let app = build_router(Arc::new(ViolationStore::new()), readiness);
        let response = app.oneshot(Request::builder().uri("/readyz").body(Body::empty()).unwrap()).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn violations_endpoint_returns_the_current_snapshot_as_json() {
        let store = Arc::new(ViolationStore::new());
        let app = build_router(store, Arc::new(ReadinessFlag::new()));
        let response = app.oneshot(Request::builder().uri("/violations").body(Body::empty()).unwrap()).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(body.as_ref(), b"[]");
    }
}
