//! `/v1/*` catch-all: any path this server does not model explicitly is
//! forwarded verbatim to a remote backend (§6). Local models have no
//! meaning here — there is no GPU resident to ensure for a path this
//! server doesn't understand — so only `remote_http` descriptors qualify.

use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::{Path, State};
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use axum::Router;

use gateway_core::config::BackendKind;

use crate::error::ServerError;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/*path", any(catchall))
}

/// Forward an unmodeled `/v1/...` request to the remote backend named by
/// the body's `model` field.
pub async fn catchall(
    State(state): State<Arc<AppState>>,
    Path(path): Path<String>,
    method: Method,
    body: Bytes,
) -> Result<Response, ServerError> {
    let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null);
    let model_id = parsed
        .get("model")
        .and_then(|v| v.as_str())
        .ok_or_else(|| ServerError::BadRequest("request body must include a 'model' field".into()))?;

    let descriptor = state
        .pipeline
        .descriptors()
        .find(model_id)
        .ok_or_else(|| ServerError::Gateway(gateway_core::GatewayError::UnknownModel(model_id.to_owned())))?;

    if !matches!(descriptor.kind, BackendKind::RemoteHttp) {
        return Err(ServerError::BadRequest(format!(
            "model '{model_id}' is not a remote backend; catch-all routes only forward to remote_http descriptors"
        )));
    }

    let base = descriptor
        .resolved_endpoint()
        .ok_or_else(|| ServerError::Internal(format!("remote descriptor '{model_id}' has no endpoint")))?;
    let url = format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'));

    let client = reqwest::Client::new();
    let mut request = client.request(method, &url).body(body);
    request = request.header("content-type", "application/json");
    if let Some(key) = descriptor.resolved_api_key() {
        if !key.is_empty() {
            request = request.header("authorization", format!("Bearer {key}"));
        }
    }
    if let Some(headers) = &descriptor.headers {
        for (name, value) in headers {
            request = request.header(name, value);
        }
    }

    let resp = request
        .send()
        .await
        .map_err(|e| ServerError::BadGateway(format!("remote backend request failed: {e}")))?;

    let status = StatusCode::from_u16(resp.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
    let content_type = resp
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/json")
        .to_owned();

    let stream = resp.bytes_stream();
    Ok((status, [(axum::http::header::CONTENT_TYPE, content_type)], Body::from_stream(stream)).into_response())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn local_descriptor_is_rejected() {
        assert!(!matches!(BackendKind::LocalText, BackendKind::RemoteHttp));
    }
}
