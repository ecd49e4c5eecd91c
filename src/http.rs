//! HTTP surface: service info, liveness, and basic metrics.
//!
//! Used by container orchestration to verify the process is alive and the
//! worker is still consuming.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;

use crate::worker::WorkerStatus;

const DESCRIPTION: &str =
    "Notification Orchestrator - relays domain events as notification events";

/// State shared with the request handlers.
#[derive(Clone)]
pub struct AppState {
    pub service: String,
    pub worker: WorkerStatus,
}

#[derive(Serialize)]
struct InfoResponse {
    service: String,
    version: &'static str,
    status: &'static str,
    description: &'static str,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    service: String,
    version: &'static str,
}

#[derive(Serialize)]
struct MetricsResponse {
    service: String,
    consumer_running: bool,
}

async fn root(State(state): State<AppState>) -> Json<InfoResponse> {
    Json(InfoResponse {
        service: state.service,
        version: env!("CARGO_PKG_VERSION"),
        status: "running",
        description: DESCRIPTION,
    })
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        service: state.service,
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn metrics(State(state): State<AppState>) -> Json<MetricsResponse> {
    Json(MetricsResponse {
        service: state.service.clone(),
        consumer_running: state.worker.is_running(),
    })
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::Value;
    use tower::ServiceExt;

    fn test_state(running: Arc<AtomicBool>) -> AppState {
        AppState {
            service: "notification-orchestrator".to_string(),
            worker: WorkerStatus::new(running),
        }
    }

    async fn get_json(router: Router, uri: &str) -> (StatusCode, Value) {
        let response = router
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let app = router(test_state(Arc::new(AtomicBool::new(true))));
        let (status, body) = get_json(app, "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["service"], "notification-orchestrator");
    }

    #[tokio::test]
    async fn test_root_reports_service_info() {
        let app = router(test_state(Arc::new(AtomicBool::new(true))));
        let (status, body) = get_json(app, "/").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "running");
        assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    }

    #[tokio::test]
    async fn test_metrics_reflects_worker_liveness() {
        let running = Arc::new(AtomicBool::new(false));
        let app = router(test_state(Arc::clone(&running)));

        let (_, body) = get_json(app.clone(), "/metrics").await;
        assert_eq!(body["consumer_running"], false);

        running.store(true, Ordering::Relaxed);
        let (_, body) = get_json(app, "/metrics").await;
        assert_eq!(body["consumer_running"], true);
    }
}
