//! Shared application state injected into every Axum handler.

use std::sync::Arc;

use gateway_core::pipeline::Pipeline;

use crate::config::Config;

/// State shared across all HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    /// Server configuration (env-derived).
    pub config: Arc<Config>,
    /// The request pipeline: GPU scheduling, routing, budgeting, proxying.
    pub pipeline: Arc<Pipeline>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState").field("config", &self.config).finish_non_exhaustive()
    }
}
