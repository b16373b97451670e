//! Speech transcription route (`POST /v1/audio/transcriptions`).
//!
//! Multipart parsing, temp-file placement, and the upload size/type checks
//! here are the gateway's side of an externally-specified contract; the
//! actual transcription happens on the whisper-cpp-style backend this
//! handler ensures is GPU-resident before forwarding the file to its
//! `/inference` endpoint.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Multipart, State};
use axum::routing::post;
use axum::{Json, Router};
use tracing::{info, warn};
use utoipa::OpenApi;

use crate::error::ServerError;
use crate::schemas::v1::audio::{TranscriptionResponse, TranscriptionSegment};
use crate::state::AppState;

/// Upload ceiling (§6).
const MAX_UPLOAD_BYTES: usize = 25 * 1024 * 1024;

const ALLOWED_EXTENSIONS: &[&str] = &["mp3", "wav", "ogg", "webm", "m4a", "flac"];

#[derive(OpenApi)]
#[openapi(paths(transcribe), components(schemas(TranscriptionResponse, TranscriptionSegment)))]
pub struct AudioApi;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/audio/transcriptions", post(transcribe))
}

struct TempUpload(std::path::PathBuf);

impl Drop for TempUpload {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.0) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %self.0.display(), error = %e, "failed to clean up transcription temp file");
            }
        }
    }
}

/// `POST /v1/audio/transcriptions`.
#[utoipa::path(
    post,
    path = "/v1/audio/transcriptions",
    tag = "audio",
    request_body(content_type = "multipart/form-data", description = "file, model, language, prompt, temperature, response_format"),
    responses(
        (status = 200, description = "Transcript", body = TranscriptionResponse),
        (status = 400, description = "Missing file or unsupported media type"),
        (status = 502, description = "Upstream backend error"),
    )
)]
pub async fn transcribe(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Json<TranscriptionResponse>, ServerError> {
    let mut file_bytes: Option<Vec<u8>> = None;
    let mut file_name: Option<String> = None;
    let mut model: Option<String> = None;
    let mut language: Option<String> = None;
    let mut prompt: Option<String> = None;
    let mut temperature: Option<String> = None;
    let mut response_format = "json".to_string();

    while let Some(field) = multipart.next_field().await.map_err(|e| ServerError::BadRequest(format!("invalid multipart body: {e}")))? {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "file" => {
                file_name = field.file_name().map(str::to_owned);
                let bytes = field.bytes().await.map_err(|e| ServerError::BadRequest(format!("failed reading file field: {e}")))?;
                if bytes.len() > MAX_UPLOAD_BYTES {
                    return Err(ServerError::BadRequest(format!(
                        "audio file too large ({} bytes); maximum is {MAX_UPLOAD_BYTES} bytes",
                        bytes.len()
                    )));
                }
                file_bytes = Some(bytes.to_vec());
            }
            "model" => model = Some(field.text().await.unwrap_or_default()),
            "language" => language = Some(field.text().await.unwrap_or_default()),
            "prompt" => prompt = Some(field.text().await.unwrap_or_default()),
            "temperature" => temperature = Some(field.text().await.unwrap_or_default()),
            "response_format" => response_format = field.text().await.unwrap_or_else(|_| "json".into()),
            _ => {}
        }
    }

    let file_bytes = file_bytes.ok_or_else(|| ServerError::BadRequest("missing required 'file' field".into()))?;
    let file_name = file_name.unwrap_or_else(|| "upload.wav".into());

    let extension = std::path::Path::new(&file_name)
        .extension()
        .and_then(std::ffi::OsStr::to_str)
        .map(str::to_lowercase)
        .unwrap_or_default();
    if !ALLOWED_EXTENSIONS.contains(&extension.as_str()) {
        return Err(ServerError::BadRequest(format!(
            "unsupported media type '.{extension}'; expected one of {ALLOWED_EXTENSIONS:?}"
        )));
    }

    let verbose = response_format == "verbose_json";

    std::fs::create_dir_all(&state.config.audio_temp_dir)
        .map_err(|e| ServerError::Internal(format!("creating audio temp dir: {e}")))?;
    let temp_path = std::path::Path::new(&state.config.audio_temp_dir).join(format!("{}-{}", uuid::Uuid::new_v4(), file_name));
    std::fs::write(&temp_path, &file_bytes).map_err(|e| ServerError::Internal(format!("writing temp upload: {e}")))?;
    let _guard = TempUpload(temp_path.clone());

    let (port, descriptor) = state.pipeline.ensure_speech_loaded(model.as_deref()).await?;

    info!(model = %descriptor.id, port, bytes = file_bytes.len(), "transcribing audio upload");

    let mut form = reqwest::multipart::Form::new().part(
        "file",
        reqwest::multipart::Part::bytes(file_bytes).file_name(file_name),
    );
    if let Some(lang) = &language {
        form = form.text("language", lang.clone());
    }
    if let Some(p) = &prompt {
        form = form.text("prompt", p.clone());
    }
    if let Some(t) = &temperature {
        form = form.text("temperature", t.clone());
    }
    form = form.text("response_format", response_format.clone());

    let client = reqwest::Client::new();
    let timeout = Duration::from_secs(descriptor.timeout_seconds());
    let resp = client
        .post(format!("http://127.0.0.1:{port}/inference"))
        .multipart(form)
        .timeout(timeout)
        .send()
        .await
        .map_err(|e| ServerError::BadGateway(format!("speech backend request failed: {e}")))?;

    let status = resp.status();
    if !status.is_success() {
        let text = resp.text().await.unwrap_or_default();
        return Err(ServerError::BadGateway(format!("speech backend returned {status}: {text}")));
    }

    let body: serde_json::Value = resp.json().await.map_err(|e| ServerError::BadGateway(format!("speech backend returned invalid JSON: {e}")))?;
    let text = body.get("text").and_then(|v| v.as_str()).unwrap_or_default().to_owned();

    if verbose {
        let segments = body.get("segments").and_then(|v| v.as_array()).map(|arr| {
            arr.iter()
                .filter_map(|s| {
                    Some(TranscriptionSegment {
                        start: s.get("start")?.as_f64().unwrap_or_default(),
                        end: s.get("end")?.as_f64().unwrap_or_default(),
                        text: s.get("text").and_then(|v| v.as_str()).unwrap_or_default().to_owned(),
                    })
                })
                .collect()
        });
        Ok(Json(TranscriptionResponse {
            text,
            language: body.get("language").and_then(|v| v.as_str()).map(str::to_owned).or(language),
            duration: body.get("duration").and_then(|v| v.as_f64()),
            segments,
        }))
    } else {
        Ok(Json(TranscriptionResponse { text, language: None, duration: None, segments: None }))
    }
}
