//! Shared result/error types for the gateway core.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::watch;

use crate::config::ModelDescriptor;

/// Errors produced anywhere in the orchestration core.
///
/// Mirrors the error-kind table of the design: each variant maps to a
/// specific HTTP disposition in `gateway-server::error::ServerError`.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Backend binary or model file missing, or a descriptor failed to parse.
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    /// A client named a model id that is not in the registry.
    #[error("unknown model: {0}")]
    UnknownModel(String),

    /// `with_gpu`'s wall-clock deadline elapsed.
    #[error("gpu critical section timed out after {0:?}")]
    GpuTimeout(std::time::Duration),

    /// A backend failed to become ready within its deadline.
    #[error("backend on port {port} did not become ready within {timeout:?}")]
    ColdStartTimeout {
        port: u16,
        timeout: std::time::Duration,
    },

    /// Upstream backend returned a non-success status.
    #[error("upstream error: status {status}, body: {body}")]
    UpstreamHttp { status: u16, body: String },

    /// The request was cancelled (client disconnect or per-request deadline).
    #[error("request cancelled")]
    Cancelled,

    /// Malformed or otherwise invalid client request.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Failure talking to a backend process (spawn, I/O, HTTP transport).
    #[error("backend I/O error: {0}")]
    Io(String),

    /// Anything else unexpected.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<std::io::Error> for GatewayError {
    fn from(e: std::io::Error) -> Self {
        GatewayError::Io(e.to_string())
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(e: reqwest::Error) -> Self {
        GatewayError::Io(e.to_string())
    }
}

/// The outcome of routing a single chat request (§3, §4.4).
///
/// Constructed fresh per request; lifetime is one HTTP request.
#[derive(Debug, Clone)]
pub struct RequestPlan {
    /// The model id the request will ultimately be dispatched to.
    pub target_model_id: String,
    /// The resolved descriptor for `target_model_id`.
    pub descriptor: ModelDescriptor,
    /// The classifier category, if routing went through the classifier alias.
    pub category: Option<String>,
    /// The category-level system prompt, if the binding supplied one.
    pub category_system_prompt: Option<String>,
}

/// A single request's cancellation signal (§5: "each request owns a single
/// cancellation signal"). Two independent producers can fire it - a deadline
/// timer and a client-disconnect observer - and any number of consumers can
/// await it via [`CancelSignal::cancelled`].
///
/// Built on a `watch` channel rather than `Notify` so a consumer that starts
/// waiting *after* cancellation already fired still observes it immediately,
/// instead of racing a missed wakeup.
#[derive(Clone)]
pub struct CancelSignal {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl CancelSignal {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self { tx: Arc::new(tx), rx }
    }

    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves immediately if already cancelled, otherwise waits.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        if *rx.borrow() {
            return;
        }
        let _ = rx.changed().await;
    }
}

impl Default for CancelSignal {
    fn default() -> Self {
        Self::new()
    }
}
