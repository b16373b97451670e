//! Streaming bidirectional proxy (C6, §4.6).

use std::pin::Pin;
use std::time::Duration;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use serde_json::Value;
use tokio::sync::oneshot;

use crate::config::{BackendKind, ModelDescriptor};
use crate::types::{CancelSignal, GatewayError};

/// Default upstream timeout when neither the request header nor the
/// descriptor specify one (§4.6).
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Resolve the effective per-request timeout: header override, then the
/// descriptor's own `timeout`, then the 30-second default.
pub fn resolve_timeout(header_seconds: Option<u64>, descriptor: &ModelDescriptor) -> Duration {
    let secs = header_seconds.unwrap_or_else(|| descriptor.timeout.unwrap_or(DEFAULT_TIMEOUT_SECS));
    Duration::from_secs(secs)
}

/// The outcome of a non-streaming proxied call.
#[derive(Debug)]
pub struct ProxyResponse {
    pub status: u16,
    pub body: Value,
}

/// A chunk of an in-flight streaming response.
pub type ByteStream = std::pin::Pin<Box<dyn Stream<Item = Result<Bytes, GatewayError>> + Send>>;

/// Forwards a rewritten chat request to its resolved backend (C6).
pub struct Proxy {
    client: reqwest::Client,
}

impl Proxy {
    pub fn new() -> Self {
        Self { client: reqwest::Client::new() }
    }

    fn target_url(&self, descriptor: &ModelDescriptor, local_port: u16) -> Result<String, GatewayError> {
        match descriptor.kind {
            BackendKind::LocalText => Ok(format!("http://127.0.0.1:{local_port}/v1/chat/completions")),
            BackendKind::LocalSpeech => Ok(format!("http://127.0.0.1:{local_port}/inference")),
            BackendKind::RemoteHttp => descriptor
                .resolved_endpoint()
                .ok_or_else(|| GatewayError::ConfigInvalid(format!("remote descriptor '{}' has no endpoint", descriptor.id))),
        }
    }

    fn build_request(
        &self,
        descriptor: &ModelDescriptor,
        local_port: u16,
        mut body: Value,
    ) -> Result<reqwest::RequestBuilder, GatewayError> {
        let url = self.target_url(descriptor, local_port)?;
        let mut request = self.client.post(&url).json(&{
            if matches!(descriptor.kind, BackendKind::RemoteHttp) {
                if let Some(model) = &descriptor.model {
                    if let Value::Object(map) = &mut body {
                        map.insert("model".to_owned(), Value::String(model.clone()));
                    }
                }
            }
            body
        });

        if matches!(descriptor.kind, BackendKind::RemoteHttp) {
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
        }

        Ok(request)
    }

    /// Forward a non-streaming request, returning the parsed body or a
    /// synthesized 502 error on upstream failure (§4.6).
    pub async fn forward(
        &self,
        descriptor: &ModelDescriptor,
        local_port: u16,
        body: Value,
        timeout: Duration,
        cancel: CancelSignal,
    ) -> Result<ProxyResponse, GatewayError> {
        let request = self.build_request(descriptor, local_port, body)?.timeout(timeout);

        let send = request.send();
        tokio::select! {
            result = send => {
                let resp = result.map_err(GatewayError::from)?;
                let status = resp.status();
                if status.is_success() {
                    let parsed: Value = resp.json().await.map_err(GatewayError::from)?;
                    Ok(ProxyResponse { status: 200, body: parsed })
                } else {
                    let text = resp.text().await.unwrap_or_default();
                    let truncated: String = text.chars().take(2000).collect();
                    Err(GatewayError::UpstreamHttp { status: status.as_u16(), body: truncated })
                }
            }
            _ = cancel.cancelled() => Err(GatewayError::Cancelled),
        }
    }

    /// Forward a streaming request, returning a byte stream the caller
    /// copies directly into the client response body (§4.6).
    pub async fn forward_stream(
        &self,
        descriptor: &ModelDescriptor,
        local_port: u16,
        body: Value,
        timeout: Duration,
        cancel: CancelSignal,
    ) -> Result<ByteStream, GatewayError> {
        let request = self.build_request(descriptor, local_port, body)?;

        let send = request.send();
        let response = tokio::select! {
            result = send => result.map_err(GatewayError::from)?,
            _ = cancel.cancelled() => return Err(GatewayError::Cancelled),
        };

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let text = response.text().await.unwrap_or_default();
            let truncated: String = text.chars().take(2000).collect();
            return Err(GatewayError::UpstreamHttp { status, body: truncated });
        }

        let (deadline_tx, deadline_rx) = oneshot::channel::<()>();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let _ = deadline_tx.send(());
        });

        let upstream = response.bytes_stream();
        let guarded = gate_stream(upstream, cancel, deadline_rx);
        Ok(Box::pin(guarded))
    }
}

impl Default for Proxy {
    fn default() -> Self {
        Self::new()
    }
}

/// Internal fold state for [`gate_stream`]: the upstream bytes, the
/// cancellation signal, the deadline timer, and whether a terminal item has
/// already been produced.
struct GateState {
    upstream: Pin<Box<dyn Stream<Item = Result<Bytes, reqwest::Error>> + Send>>,
    cancel: CancelSignal,
    deadline: oneshot::Receiver<()>,
    done: bool,
}

/// Wrap an upstream byte stream so it stops yielding once either the
/// cancellation signal fires or the deadline timer elapses (§4.6, §5).
fn gate_stream(
    upstream: impl Stream<Item = Result<Bytes, reqwest::Error>> + Send + 'static,
    cancel: CancelSignal,
    deadline: oneshot::Receiver<()>,
) -> impl Stream<Item = Result<Bytes, GatewayError>> + Send + 'static {
    let state = GateState {
        upstream: Box::pin(upstream),
        cancel,
        deadline,
        done: false,
    };

    futures::stream::unfold(state, |mut state| async move {
        if state.done {
            return None;
        }
        tokio::select! {
            biased;
            _ = state.cancel.cancelled() => {
                state.done = true;
                Some((Err(GatewayError::Cancelled), state))
            }
            _ = &mut state.deadline => {
                state.done = true;
                Some((Err(GatewayError::Cancelled), state))
            }
            chunk = state.upstream.next() => {
                match chunk {
                    Some(Ok(bytes)) => Some((Ok(bytes), state)),
                    Some(Err(e)) => {
                        state.done = true;
                        Some((Err(GatewayError::from(e)), state))
                    }
                    None => None,
                }
            }
        }
    })
}
