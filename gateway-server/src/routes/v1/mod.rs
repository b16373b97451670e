pub mod audio;
pub mod catchall;
pub mod chat;
pub mod models;

use std::sync::Arc;

use axum::Router;
use utoipa::OpenApi;

use crate::state::AppState;

/// Routes nested under `/v1` (OpenAI-compatible). `catchall` is merged last
/// so the explicit routes above take priority.
pub fn router() -> Router<Arc<AppState>> {
    Router::new().merge(chat::router()).merge(audio::router()).merge(models::router()).merge(catchall::router())
}

#[derive(OpenApi)]
#[openapi()]
pub struct V1Api;

pub fn api_docs() -> utoipa::openapi::OpenApi {
    let mut spec = V1Api::openapi();
    spec.merge(audio::AudioApi::openapi());
    spec.merge(chat::ChatApi::openapi());
    spec.merge(models::ModelsApi::openapi());
    spec
}
