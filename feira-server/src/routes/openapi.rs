use std::sync::Arc;

use axum::{Json, Router, response::IntoResponse, routing::get};
use utoipa::OpenApi;

use crate::{app_state::AppState, openapi::ApiDoc};

async fn openapi_json() -> impl IntoResponse {
    Json(ApiDoc::openapi())
}

/// Unauthenticated OpenAPI document, relative to `/api`.
pub fn openapi_routes() -> Router<Arc<AppState>> {
    Router::new().route("/openapi.json", get(openapi_json))
}
