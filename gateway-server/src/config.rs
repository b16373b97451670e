//! Server configuration, loaded from environment variables at startup.

/// Runtime configuration for gateway-server.
///
/// Every field has a sensible default so the server works out-of-the-box
/// without any environment variables set.
#[derive(Debug, Clone)]
pub struct Config {
    /// TCP address to bind (default: `"0.0.0.0:3000"`).
    pub bind_address: String,

    /// Path to the JSON descriptor file describing backends and category
    /// bindings (§3). Loaded once at startup; configuration is immutable
    /// for the life of the process.
    pub descriptors_path: String,

    /// Path to the `llama.cpp`-style text backend binary.
    pub text_backend_path: String,

    /// Path to the `whisper.cpp`-style speech backend binary.
    pub speech_backend_path: String,

    /// `tracing` filter string, e.g. `"info"` or `"debug,tower_http=warn"`.
    pub log_level: String,

    /// When `true`, emit log records as newline-delimited JSON.
    pub log_json: bool,

    /// When `true`, serve the Swagger UI at `/swagger-ui` and the OpenAPI
    /// spec at `/api-docs/openapi.json`. Set `GATEWAY_ENABLE_SWAGGER=false`
    /// to disable in production if you don't want the API structure
    /// exposed.
    pub enable_swagger: bool,

    /// Comma-separated list of allowed CORS origins, e.g.
    /// `"https://app.example.com,https://admin.example.com"`.
    /// When `None` (default), all origins are allowed (`*`).
    ///
    /// **Security note:** The wildcard default is convenient for
    /// development but should be restricted to trusted origins in
    /// production.
    pub cors_allowed_origins: Option<String>,

    /// Optional bearer token required for management endpoints
    /// (`/v1/cleanup*`, `/v1/logging*`, `/test/model*`). Set
    /// `GATEWAY_ADMIN_TOKEN=<secret>` to require an
    /// `Authorization: Bearer <secret>` header on those routes. When
    /// `None`, management endpoints are unauthenticated.
    pub admin_api_token: Option<String>,

    /// Directory used for temporary audio-transcription uploads.
    pub audio_temp_dir: String,
}

impl Config {
    /// Build [`Config`] from environment variables, falling back to
    /// defaults.
    pub fn from_env() -> Self {
        Self {
            bind_address: env_or("GATEWAY_BIND", "0.0.0.0:3000"),
            descriptors_path: env_or("GATEWAY_DESCRIPTORS", "gateway.json"),
            text_backend_path: env_or("GATEWAY_TEXT_BACKEND", "/usr/local/bin/llama-server"),
            speech_backend_path: env_or("GATEWAY_SPEECH_BACKEND", "/usr/local/bin/whisper-server"),
            log_level: env_or("GATEWAY_LOG", "info"),
            log_json: std::env::var("GATEWAY_LOG_JSON")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
            enable_swagger: std::env::var("GATEWAY_ENABLE_SWAGGER")
                .map(|v| v != "0" && !v.eq_ignore_ascii_case("false"))
                .unwrap_or(true),
            cors_allowed_origins: std::env::var("GATEWAY_CORS_ORIGINS").ok(),
            admin_api_token: std::env::var("GATEWAY_ADMIN_TOKEN").ok(),
            audio_temp_dir: env_or("GATEWAY_AUDIO_TEMP_DIR", "/tmp/gateway-audio"),
        }
    }
}

// ── private helpers ──────────────────────────────────────────────────────────

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_owned())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn defaults_apply_when_env_unset() {
        unsafe {
            std::env::remove_var("GATEWAY_BIND");
        }
        let cfg = Config::from_env();
        assert_eq!(cfg.bind_address, "0.0.0.0:3000");
        assert!(cfg.enable_swagger);
        assert!(cfg.cors_allowed_origins.is_none());
    }
}
