//! OpenAI-compatible request/response types for `/v1/chat/completions`.
//!
//! Message `content` and any fields beyond the ones the gateway itself
//! inspects (`tools`, `tool_choice`, `response_format`, ...) are kept as raw
//! JSON so they ride through to the backend unmodified (opaque passthrough).

use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

/// A single message. `content` is either a bare string or a list of typed
/// parts (text / image_url); see `gateway_core::content`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ChatMessage {
    pub role: String,
    #[schema(value_type = Object)]
    pub content: Value,
}

/// Request body for `POST /v1/chat/completions`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ChatCompletionRequest {
    /// Explicit model id, the classifier alias `lols-smart`, or omitted
    /// entirely (defaults to the classifier alias).
    #[serde(default)]
    pub model: Option<String>,
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default, alias = "n_predict")]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub top_p: Option<f32>,
    /// Everything else (`tools`, `tool_choice`, `response_format`, ...) is
    /// forwarded to the backend verbatim without inspection.
    #[serde(flatten)]
    #[schema(value_type = Object)]
    pub extra: serde_json::Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ChatChoice {
    pub index: u32,
    pub message: ChatMessage,
    pub finish_reason: String,
}

/// Response body for `POST /v1/chat/completions` (non-streaming path).
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ChatCompletionResponse {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub model: String,
    pub choices: Vec<ChatChoice>,
}
