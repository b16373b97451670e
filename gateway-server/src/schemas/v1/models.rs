//! Response types for `GET /v1/models`.

use serde::Serialize;
use utoipa::ToSchema;

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ModelObject {
    pub id: String,
    pub object: String,
    pub created: i64,
    /// `llama-cpp`, `whisper-cpp`, `remote-api`, or `lols-router` for the
    /// classifier alias.
    pub owned_by: String,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ModelListResponse {
    pub object: String,
    pub data: Vec<ModelObject>,
}
