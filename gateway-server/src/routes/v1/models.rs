//! `GET /v1/models`: enumerate the configured backends as OpenAI model objects.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use utoipa::OpenApi;

use gateway_core::config::{BackendKind, CLASSIFIER_ALIAS};

use crate::schemas::v1::models::{ModelListResponse, ModelObject};
use crate::state::AppState;

#[derive(OpenApi)]
#[openapi(paths(list_models), components(schemas(ModelListResponse, ModelObject)))]
pub struct ModelsApi;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/models", get(list_models))
}

fn owned_by(kind: BackendKind) -> &'static str {
    match kind {
        BackendKind::LocalText => "llama-cpp",
        BackendKind::LocalSpeech => "whisper-cpp",
        BackendKind::RemoteHttp => "remote-api",
    }
}

/// List configured models (`GET /v1/models`).
///
/// Every descriptor in the active configuration is listed under its own
/// `id`, plus a synthetic `lols-smart` entry when at least one classifier
/// category is configured, since that alias is itself a valid value for the
/// chat completion request's `model` field.
#[utoipa::path(
    get,
    path = "/v1/models",
    tag = "models",
    responses((status = 200, description = "List of configured models", body = ModelListResponse))
)]
pub async fn list_models(State(state): State<Arc<AppState>>) -> Json<ModelListResponse> {
    let descriptors = state.pipeline.descriptors();
    let created = 0;

    let mut data: Vec<ModelObject> = descriptors
        .models
        .iter()
        .map(|m| ModelObject {
            id: m.id.clone(),
            object: "model".into(),
            created,
            owned_by: owned_by(m.kind).into(),
        })
        .collect();

    if !descriptors.categories.is_empty() {
        data.push(ModelObject {
            id: CLASSIFIER_ALIAS.into(),
            object: "model".into(),
            created,
            owned_by: "lols-router".into(),
        });
    }

    Json(ModelListResponse { object: "list".into(), data })
}
