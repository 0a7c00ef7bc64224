use std::sync::Arc;

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::get,
};
use serde::Serialize;
use tracing::warn;

use crate::app_state::AppState;

#[derive(Serialize)]
struct HealthResponse<'a> {
    status: &'a str,
    backend: &'a str,
}

async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    metrics::counter!("health_checks_total", "endpoint" => "healthz", "status" => "ok")
        .increment(1);
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok",
            backend: backend_label(&state),
        }),
    )
}

async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let backend = backend_label(&state);
    match state.store.ping().await {
        Ok(()) => {
            metrics::counter!(
                "health_checks_total",
                "endpoint" => "readyz",
                "status" => "ok"
            )
            .increment(1);
            (
                StatusCode::OK,
                Json(HealthResponse {
                    status: "ready",
                    backend,
                }),
            )
        }
        Err(err) => {
            warn!(error = %err, "readiness check failed");
            metrics::counter!(
                "health_checks_total",
                "endpoint" => "readyz",
                "status" => "error"
            )
            .increment(1);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse {
                    status: "degraded",
                    backend,
                }),
            )
        }
    }
}

fn backend_label(state: &AppState) -> &'static str {
    if state.pool.is_some() {
        "postgres"
    } else {
        "memory"
    }
}

pub fn create_health_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
}
