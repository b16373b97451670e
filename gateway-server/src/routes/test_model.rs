//! Debug override for C4 routing: pin every chat request to one model id,
//! bypassing classification entirely (`/test/model*`, §4.4 step 1).

use std::sync::Arc;

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use utoipa::{OpenApi, ToSchema};

use crate::state::AppState;

#[derive(OpenApi)]
#[openapi(paths(get_test_model, set_test_model, clear_test_model), components(schemas(SetTestModelRequest)))]
pub struct TestModelApi;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/test/model", get(get_test_model).post(set_test_model))
        .route("/test/model/clear", post(clear_test_model))
}

#[derive(Deserialize, ToSchema)]
pub struct SetTestModelRequest {
    pub model_id: String,
}

/// `GET /test/model`.
#[utoipa::path(get, path = "/test/model", tag = "admin", responses((status = 200, body = Value)))]
pub async fn get_test_model(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({ "model_id": state.pipeline.router().test_model().await }))
}

/// `POST /test/model`.
#[utoipa::path(post, path = "/test/model", tag = "admin", request_body = SetTestModelRequest, responses((status = 200, body = Value)))]
pub async fn set_test_model(State(state): State<Arc<AppState>>, Json(req): Json<SetTestModelRequest>) -> Json<Value> {
    state.pipeline.router().set_test_model(Some(req.model_id.clone())).await;
    Json(json!({ "model_id": req.model_id }))
}

/// `POST /test/model/clear`.
#[utoipa::path(post, path = "/test/model/clear", tag = "admin", responses((status = 200, body = Value)))]
pub async fn clear_test_model(State(state): State<Arc<AppState>>) -> Json<Value> {
    state.pipeline.router().set_test_model(None).await;
    Json(json!({ "model_id": Value::Null }))
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
    async fn no_pin_is_set_by_default() {
        let state = bare_state();
        let Json(body) = get_test_model(State(state)).await;
        assert_eq!(body["model_id"], Value::Null);
    }

    #[tokio::test]
    async fn setting_then_clearing_round_trips() {
        let state = bare_state();
        let Json(set) = set_test_model(State(Arc::clone(&state)), Json(SetTestModelRequest { model_id: "coder".into() })).await;
        assert_eq!(set["model_id"], "coder");
        let Json(read_back) = get_test_model(State(Arc::clone(&state))).await;
        assert_eq!(read_back["model_id"], "coder");

        clear_test_model(State(Arc::clone(&state))).await;
        let Json(after_clear) = get_test_model(State(state)).await;
        assert_eq!(after_clear["model_id"], Value::Null);
    }
}
