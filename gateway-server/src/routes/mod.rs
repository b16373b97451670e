//! Axum router construction.
//!
//! [`build`] assembles the complete application router:
//! - Middleware layers (CORS, per-request trace-ID injection)
//! - Optional Swagger UI / OpenAPI spec endpoint (disable with `GATEWAY_ENABLE_SWAGGER=false`)
//! - Health / diagnostics routes
//! - OpenAI-compatible `/v1` routes, plus the management surface
//!   (`/v1/cleanup*`, `/v1/logging*`, `/test/model*`) behind a bearer-token
//!   guard
//! - The status WebSocket at `/`

mod cleanup;
pub mod doc;
mod health;
mod logging;
mod test_model;
mod v1;
mod ws;

use std::sync::Arc;

use axum::middleware::from_fn_with_state;
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use utoipa_swagger_ui::SwaggerUi;

use crate::middleware::auth::check_management_auth;
use crate::middleware::TraceLayer;
use crate::state::AppState;

/// Build the complete Axum [`Router`] for the application.
pub fn build(state: Arc<AppState>) -> Router {
    let cors = if let Some(origins_str) = &state.config.cors_allowed_origins {
        let origins: Vec<axum::http::HeaderValue> = origins_str.split(',').filter_map(|s| s.trim().parse().ok()).collect();
        if origins.is_empty() {
            CorsLayer::new().allow_origin(Any).allow_headers(Any).allow_methods(Any)
        } else {
            CorsLayer::new().allow_origin(origins).allow_headers(Any).allow_methods(Any)
        }
    } else {
        CorsLayer::new().allow_origin(Any).allow_headers(Any).allow_methods(Any)
    };

    let v1_protected = Router::new()
        .merge(cleanup::router())
        .merge(logging::router())
        .route_layer(from_fn_with_state(Arc::clone(&state), check_management_auth));

    let v1_combined = Router::new().merge(v1::router()).merge(v1_protected);

    let test_model_routes =
        test_model::router().route_layer(from_fn_with_state(Arc::clone(&state), check_management_auth));

    let api_router = Router::new()
        .merge(health::router())
        .nest("/v1", v1_combined)
        .merge(test_model_routes)
        .merge(ws::router());

    let mut app = Router::new().merge(api_router);

    let api_doc = doc::get_docs();
    if state.config.enable_swagger {
        app = app.merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", api_doc));
    }

    app
        // Outermost layers execute first on the way in.
        .layer(TraceLayer::new(Arc::clone(&state)))
        .layer(cors)
        .with_state(state)
}
