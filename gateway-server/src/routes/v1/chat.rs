//! OpenAI-compatible chat-completion route.
//!
//! Delegates the whole request to `gateway_core::pipeline::Pipeline`, which
//! owns routing, GPU scheduling, context truncation, system-prompt
//! injection, and proxying. This handler's job is purely HTTP: decode the
//! request, wire up a per-request `CancelSignal`, and translate the
//! pipeline's outcome into a streaming or JSON response.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::header::HeaderName;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use futures::stream::{Stream, StreamExt};
use gateway_core::pipeline::PipelineOutcome;
use gateway_core::types::CancelSignal;
use tracing::debug;
use utoipa::OpenApi;

use crate::error::ServerError;
use crate::schemas::v1::chat::{ChatChoice, ChatCompletionRequest, ChatCompletionResponse, ChatMessage as OpenAiMessage};
use crate::state::AppState;

static X_REQUEST_TIMEOUT: HeaderName = HeaderName::from_static("x-request-timeout");

#[derive(OpenApi)]
#[openapi(
    paths(chat_completions),
    components(schemas(ChatCompletionRequest, ChatCompletionResponse, OpenAiMessage, ChatChoice))
)]
pub struct ChatApi;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/chat/completions", post(chat_completions))
}

/// `POST /v1/chat/completions`.
#[utoipa::path(
    post,
    path = "/v1/chat/completions",
    tag = "chat",
    request_body = ChatCompletionRequest,
    responses(
        (status = 200, description = "Completion generated", body = ChatCompletionResponse),
        (status = 400, description = "Bad request"),
        (status = 500, description = "Backend error"),
        (status = 502, description = "Upstream backend error"),
    )
)]
pub async fn chat_completions(
    State(state): State<Arc<AppState>>,
    headers: axum::http::HeaderMap,
    Json(req): Json<ChatCompletionRequest>,
) -> Result<Response, ServerError> {
    let timeout_header_seconds = headers
        .get(&X_REQUEST_TIMEOUT)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());

    debug!(model = ?req.model, messages = req.messages.len(), stream = req.stream, "chat completion request");

    let messages: Vec<serde_json::Value> = req
        .messages
        .into_iter()
        .map(|m| serde_json::json!({"role": m.role, "content": m.content}))
        .collect();

    let mut passthrough = req.extra;
    if let Some(t) = req.temperature {
        passthrough.insert("temperature".into(), serde_json::json!(t));
    }
    if let Some(p) = req.top_p {
        passthrough.insert("top_p".into(), serde_json::json!(p));
    }

    let cancel = CancelSignal::new();
    let stream_requested = req.stream;

    let outcome = state
        .pipeline
        .handle_chat(req.model.as_deref(), messages, req.max_tokens, stream_requested, timeout_header_seconds, cancel.clone(), passthrough)
        .await?;

    match outcome {
        PipelineOutcome::Streaming(bytes) => {
            let body = Body::from_stream(cancel_on_drop(bytes, cancel));
            Ok(Response::builder()
                .status(StatusCode::OK)
                .header(axum::http::header::CONTENT_TYPE, "text/event-stream")
                .body(body)
                .unwrap())
        }
        PipelineOutcome::Complete(resp) => Ok((StatusCode::from_u16(resp.status).unwrap_or(StatusCode::OK), Json(resp.body)).into_response()),
    }
}

/// Forward the upstream byte stream, firing `cancel` when this stream is
/// dropped before exhaustion (the client disconnected mid-response).
fn cancel_on_drop(
    inner: impl Stream<Item = Result<bytes::Bytes, gateway_core::GatewayError>> + Send + 'static,
    cancel: CancelSignal,
) -> impl Stream<Item = Result<bytes::Bytes, gateway_core::GatewayError>> + Send + 'static {
    struct Guard(CancelSignal);
    impl Drop for Guard {
        fn drop(&mut self) {
            self.0.cancel();
        }
    }

    let guard = Guard(cancel);
    inner.inspect(move |_| {
        let _ = &guard;
    })
}
