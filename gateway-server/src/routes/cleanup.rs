//! Manual backend teardown (`/v1/cleanup*`), for operators who want the GPU
//! freed without waiting for the next request's eviction (§4.7, §6).

use std::sync::Arc;

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use utoipa::OpenApi;

use crate::error::ServerError;
use crate::state::AppState;

#[derive(OpenApi)]
#[openapi(paths(cleanup, cleanup_status))]
pub struct CleanupApi;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/cleanup", post(cleanup)).route("/cleanup/status", get(cleanup_status))
}

/// `POST /v1/cleanup`: evict the GPU resident and sweep stray local
/// processes, leaving the classifier untouched.
#[utoipa::path(post, path = "/v1/cleanup", tag = "admin", responses((status = 200, body = Value), (status = 500, body = Value)))]
pub async fn cleanup(State(state): State<Arc<AppState>>) -> Result<Json<Value>, ServerError> {
    let report = state.pipeline.cleanup().await?;
    let data: Vec<Value> = report.into_iter().map(|(port, up)| json!({ "port": port, "still_up": up })).collect();
    Ok(Json(json!({ "cleaned": data })))
}

/// `GET /v1/cleanup/status`: liveness of every configured local port.
#[utoipa::path(get, path = "/v1/cleanup/status", tag = "admin", responses((status = 200, body = Value)))]
pub async fn cleanup_status(State(state): State<Arc<AppState>>) -> Json<Value> {
    let statuses = state.pipeline.port_statuses().await;
    let data: Vec<Value> = statuses
        .into_iter()
        .map(|(model_id, port, up)| json!({ "model_id": model_id, "port": port, "up": up }))
        .collect();
    Json(json!({ "models": data }))
}
