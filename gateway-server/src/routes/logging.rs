//! Runtime toggle for the `log` status-bus channel (`/v1/logging*`).
//!
//! Management endpoints; protected by [`crate::middleware::auth`] when
//! `GATEWAY_ADMIN_TOKEN` is configured.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use utoipa::{OpenApi, ToSchema};

use crate::state::AppState;

#[derive(OpenApi)]
#[openapi(paths(get_logging, toggle_logging, set_logging), components(schemas(SetLoggingRequest)))]
pub struct LoggingApi;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/logging", get(get_logging))
        .route("/logging/toggle", post(toggle_logging))
        .route("/logging/set", post(set_logging))
}

#[derive(Deserialize, ToSchema)]
pub struct SetLoggingRequest {
    pub enabled: bool,
}

/// `GET /v1/logging`.
#[utoipa::path(get, path = "/v1/logging", tag = "admin", responses((status = 200, body = Value)))]
pub async fn get_logging(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({ "enabled": state.pipeline.status().logging_enabled() }))
}

/// `POST /v1/logging/toggle`.
#[utoipa::path(post, path = "/v1/logging/toggle", tag = "admin", responses((status = 200, body = Value)))]
pub async fn toggle_logging(State(state): State<Arc<AppState>>) -> Json<Value> {
    let enabled = state.pipeline.status().toggle_logging();
    Json(json!({ "enabled": enabled }))
}

/// `POST /v1/logging/set`.
#[utoipa::path(post, path = "/v1/logging/set", tag = "admin", request_body = SetLoggingRequest, responses((status = 200, body = Value)))]
pub async fn set_logging(State(state): State<Arc<AppState>>, Json(req): Json<SetLoggingRequest>) -> Json<Value> {
    state.pipeline.status().set_logging(req.enabled);
    Json(json!({ "enabled": req.enabled }))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::Config;
    use gateway_core::config::GatewayDescriptors;
    use gateway_core::driver::{BackendDriver, ProcessHandle};
    use gateway_core::orchestrator::Orchestrator;
    use gateway_core::pipeline::Pipeline;
    use gateway_core::registry::ModelRegistry;
    use gateway_core::router::Router as ClassifierRouter;
    use gateway_core::scheduler::GpuScheduler;
    use gateway_core::status::StatusBus;
    use gateway_core::types::GatewayError;
    use std::collections::HashMap;

    struct NoopDriver;
    #[async_trait::async_trait]
    impl BackendDriver for NoopDriver {
        async fn start(&self, _d: &gateway_core::config::ModelDescriptor) -> Result<ProcessHandle, GatewayError> {
            Err(GatewayError::Internal("not used in this test".into()))
        }
        async fn stop(&self, _handle: ProcessHandle) -> Result<(), GatewayError> {
            Ok(())
        }
        async fn wait_ready(&self, _port: u16, _deadline: std::time::Duration) -> Result<(), GatewayError> {
            Ok(())
        }
        async fn is_up(&self, _port: u16) -> bool {
            false
        }
    }

    fn bare_state() -> Arc<AppState> {
        let descriptors =
            GatewayDescriptors { models: vec![], categories: HashMap::new(), router: None, ignore_role_system: false, default_speech_model: None };
        let status = StatusBus::new();
        let orchestrator = Arc::new(Orchestrator::new(Arc::new(NoopDriver), Arc::new(NoopDriver), status.clone()));
        let pipeline = Pipeline::new(
            descriptors,
            GpuScheduler::new(),
            orchestrator,
            Arc::new(ClassifierRouter::new()),
            Arc::new(ModelRegistry::new()),
            status,
        );
        Arc::new(AppState { config: Arc::new(Config::from_env()), pipeline: Arc::new(pipeline) })
    }

    #[tokio::test]
    async fn logging_is_disabled_by_default() {
        let state = bare_state();
        let Json(body) = get_logging(State(state)).await;
        assert_eq!(body["enabled"], false);
    }

    #[tokio::test]
    async fn toggle_flips_the_reported_state() {
        let state = bare_state();
        let Json(first) = toggle_logging(State(Arc::clone(&state))).await;
        let Json(second) = toggle_logging(State(state)).await;
        assert_ne!(first["enabled"], second["enabled"]);
    }

    #[tokio::test]
    async fn set_pins_the_requested_state() {
        let state = bare_state();
        let Json(body) = set_logging(State(Arc::clone(&state)), Json(SetLoggingRequest { enabled: true })).await;
        assert_eq!(body["enabled"], true);
        let Json(read_back) = get_logging(State(state)).await;
        assert_eq!(read_back["enabled"], true);
    }
}
