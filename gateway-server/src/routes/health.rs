//! Health / heartbeat endpoints.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};
use utoipa::OpenApi;

use crate::state::AppState;

#[derive(OpenApi)]
#[openapi(paths(get_health, get_diagnostics))]
pub struct HealthApi;

/// Register health-check routes.
pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/health", get(get_health)).route("/diagnostics", get(get_diagnostics))
}

/// Heartbeat endpoint.
#[utoipa::path(
    get,
    path = "/health",
    tag = "health",
    responses((status = 200, description = "Server is healthy", body = Value))
)]
pub async fn get_health() -> Json<Value> {
    Json(json!({ "status": "ok", "version": env!("CARGO_PKG_VERSION") }))
}

/// Diagnostics endpoint: the current GPU resident, classifier readiness,
/// and the configured descriptor count.
#[utoipa::path(
    get,
    path = "/diagnostics",
    tag = "health",
    responses((status = 200, description = "Diagnostics information", body = Value))
)]
pub async fn get_diagnostics(State(state): State<Arc<AppState>>) -> Json<Value> {
    let descriptors = state.pipeline.descriptors();
    let resident_model = state.pipeline.orchestrator().current_model().await;
    let resident_port = state.pipeline.orchestrator().current_port().await;

    Json(json!({
        "version": env!("CARGO_PKG_VERSION"),
        "bind_address": state.config.bind_address,
        "log_level": state.config.log_level,
        "resident": {
            "model_id": resident_model,
            "port": resident_port,
        },
        "configured_models": descriptors.models.len(),
        "configured_categories": descriptors.categories.len(),
        "classifier_configured": descriptors.router.is_some(),
    }))
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn health_response_has_ok_status() {
        let Json(body) = get_health().await;
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn health_response_has_version() {
        let Json(body) = get_health().await;
        assert!(!body["version"].as_str().unwrap_or("").is_empty());
    }
}
