//! Route configuration.

use crate::metrics::metrics_handler;
use crate::pipeline;
use crate::state::AppState;
use axum::http::{HeaderValue, Request};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing::info;
use uuid::Uuid;

/// Create the application router. Control endpoints are routed explicitly;
/// everything else falls through to the media pipeline.
pub fn create_router(state: AppState) -> Router {
    let mut router = Router::new()
        .route("/health", get(health))
        .route("/admin/reload", post(reload));

    // SECURITY: restrict this endpoint to scraper networks in deployments.
    if state.config.server.metrics_enabled {
        router = router.route("/prometheus/metrics", get(metrics_handler));
    }

    router
        .fallback(pipeline::serve_media)
        .layer(middleware::from_fn(trace_id_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// GET /health - unauthenticated liveness for load balancers.
async fn health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

/// POST /admin/reload - rebuild the tenant/profile tables asynchronously.
async fn reload(axum::extract::State(state): axum::extract::State<AppState>) -> impl IntoResponse {
    tokio::spawn(async move {
        if let Err(e) = state.reload().await {
            tracing::error!(error = %e, "configuration reload failed");
        } else {
            info!("configuration reload completed");
        }
    });
    Json(json!({"status": "reloading"}))
}

/// Attach a trace identifier to every response.
async fn trace_id_middleware(req: Request<axum::body::Body>, next: Next) -> Response {
    let trace_id = Uuid::new_v4().to_string();
    let mut response = next.run(req).await;
    if let Ok(value) = HeaderValue::from_str(&trace_id) {
        response.headers_mut().insert("x-trace-id", value);
    }
    response
}
