//! Unified server error type.
//!
//! Every handler returns `Result<T, ServerError>`, which implements
//! [`axum::response::IntoResponse`] so errors are automatically converted to
//! a JSON-body HTTP response with the disposition table of §7.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use gateway_core::GatewayError;
use serde_json::json;
use thiserror::Error;

/// All errors that can occur in the gateway-server request lifecycle.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Propagated from gateway-core's orchestration layer.
    #[error("gateway error: {0}")]
    Gateway(#[from] GatewayError),

    /// The caller referenced a resource that does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The caller sent an invalid or malformed request.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// A backend outside gateway-core's own proxy (e.g. a direct multipart
    /// call to a speech backend) returned an error or malformed response.
    #[error("upstream error: {0}")]
    BadGateway(String),

    /// An unclassified internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        match self {
            ServerError::Gateway(e) => gateway_error_response(e),
            ServerError::NotFound(m) => (StatusCode::NOT_FOUND, Json(json!({ "error": m }))).into_response(),
            ServerError::BadRequest(m) => (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": { "message": m, "type": "invalid_request_error" } })),
            )
                .into_response(),
            ServerError::BadGateway(m) => (
                StatusCode::BAD_GATEWAY,
                Json(json!({ "error": { "message": m, "type": "invalid_request_error" } })),
            )
                .into_response(),
            ServerError::Internal(m) => (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": m }))).into_response(),
        }
    }
}

/// Map each [`GatewayError`] variant to its §7 disposition.
fn gateway_error_response(e: GatewayError) -> Response {
    match &e {
        GatewayError::ConfigInvalid(_) => {
            (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": e.to_string() }))).into_response()
        }
        GatewayError::UnknownModel(model) => (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": format!("unknown model: {model}") })),
        )
            .into_response(),
        GatewayError::GpuTimeout(_) => {
            (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": e.to_string() }))).into_response()
        }
        GatewayError::ColdStartTimeout { .. } => {
            (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": e.to_string() }))).into_response()
        }
        GatewayError::UpstreamHttp { status, body } => (
            StatusCode::BAD_GATEWAY,
            Json(json!({ "error": { "upstream_status": status, "body": body } })),
        )
            .into_response(),
        GatewayError::Cancelled => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
        GatewayError::BadRequest(m) => (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": { "message": m, "type": "invalid_request_error" } })),
        )
            .into_response(),
        GatewayError::Io(_) | GatewayError::Internal(_) => {
            (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": e.to_string() }))).into_response()
        }
    }
}

impl From<anyhow::Error> for ServerError {
    fn from(e: anyhow::Error) -> Self {
        ServerError::Internal(e.to_string())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn unknown_model_maps_to_bad_request() {
        let resp = ServerError::Gateway(GatewayError::UnknownModel("ghost".into())).into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn upstream_http_error_maps_to_bad_gateway() {
        let resp = ServerError::Gateway(GatewayError::UpstreamHttp { status: 503, body: "down".into() }).into_response();
        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn bad_gateway_maps_to_502() {
        let resp = ServerError::BadGateway("speech backend unreachable".into()).into_response();
        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn cold_start_timeout_maps_to_internal_error() {
        let resp = ServerError::Gateway(GatewayError::ColdStartTimeout {
            port: 8081,
            timeout: std::time::Duration::from_secs(300),
        })
        .into_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
