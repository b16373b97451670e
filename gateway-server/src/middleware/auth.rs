//! Bearer-token guard for the management surface (`/v1/cleanup*`,
//! `/v1/logging*`, `/test/model*`).

use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::{Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::state::AppState;

/// When `state.config.admin_api_token` is set, requires a matching
/// `Authorization: Bearer <token>` header. When unset, every request passes
/// through unauthenticated.
pub async fn check_management_auth(State(state): State<Arc<AppState>>, req: Request<Body>, next: Next) -> Response {
    if let Some(expected) = &state.config.admin_api_token {
        let provided = req
            .headers()
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "));
        match provided {
            Some(token) if token == expected => {}
            _ => {
                return (StatusCode::UNAUTHORIZED, Json(serde_json::json!({ "error": "unauthorised" }))).into_response();
            }
        }
    }
    next.run(req).await
}
