//! Text-LLM backend driver variant (e.g. a `llama.cpp`-style server).

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use super::{check_exists, poll_ready, single_shot_up, stop_child, BackendDriver, ProcessHandle};
use crate::config::{BackendKind, ModelDescriptor};
use crate::types::GatewayError;

/// Drives a local text-generation backend process.
pub struct TextDriver {
    /// Path to the backend server binary.
    binary_path: String,
    client: reqwest::Client,
}

impl TextDriver {
    pub fn new(binary_path: impl Into<String>) -> Self {
        Self {
            binary_path: binary_path.into(),
            client: reqwest::Client::new(),
        }
    }

    /// Assemble the backend's CLI arguments from the descriptor (§4.1).
    fn build_args(desc: &ModelDescriptor) -> Vec<String> {
        let mut args = Vec::new();
        let port = desc.port.expect("local_text descriptor must have a port");
        args.push("--port".into());
        args.push(port.to_string());
        args.push("--host".into());
        args.push("127.0.0.1".into());

        if let Some(repo) = &desc.repo {
            args.push("--hf-repo".into());
            args.push(repo.clone());
        }
        if let Some(file) = &desc.file {
            args.push("--model".into());
            args.push(file.clone());
        }
        if let Some(mmproj) = &desc.mmproj {
            args.push("--mmproj".into());
            args.push(mmproj.clone());
        }
        if let Some(context) = desc.context {
            // Override the backend's advertised context length to the
            // configured value.
            args.push("--ctx-size".into());
            args.push(context.to_string());
        }
        if let Some(max_tokens) = desc.max_tokens {
            args.push("--n-predict".into());
            args.push(max_tokens.to_string());
        }

        if desc.gpu {
            args.push("--n-gpu-layers".into());
            args.push("999".into());
        } else {
            args.push("--n-gpu-layers".into());
            args.push("0".into());
        }

        if let Some(perf) = &desc.performance {
            if perf.flash_attention.unwrap_or(false) {
                args.push("--flash-attn".into());
            }
            if let Some(b) = perf.batch_size {
                args.push("--batch-size".into());
                args.push(b.to_string());
            }
            if let Some(ub) = perf.ubatch_size {
                args.push("--ubatch-size".into());
                args.push(ub.to_string());
            }
            if let Some(t) = perf.threads {
                args.push("--threads".into());
                args.push(t.to_string());
            }
            if let Some(slots) = perf.parallel_slots {
                args.push("--parallel".into());
                args.push(slots.to_string());
            }
            if perf.continuous_batching.unwrap_or(false) {
                args.push("--cont-batching".into());
            }
            if let Some(k) = &perf.cache_type_k {
                args.push("--cache-type-k".into());
                args.push(k.clone());
            }
            if let Some(v) = &perf.cache_type_v {
                args.push("--cache-type-v".into());
                args.push(v.clone());
            }
        }

        if let Some(t) = desc.temperature {
            args.push("--temp".into());
            args.push(t.to_string());
        }
        if let Some(p) = desc.top_p {
            args.push("--top-p".into());
            args.push(p.to_string());
        }

        args
    }
}

#[async_trait]
impl BackendDriver for TextDriver {
    async fn start(&self, desc: &ModelDescriptor) -> Result<ProcessHandle, GatewayError> {
        if !matches!(desc.kind, BackendKind::LocalText) {
            return Err(GatewayError::ConfigInvalid(format!(
                "TextDriver cannot start non-local_text descriptor '{}'",
                desc.id
            )));
        }
        check_exists("backend binary", &self.binary_path)?;
        if let Some(file) = &desc.file {
            check_exists("model file", file)?;
        }

        let args = Self::build_args(desc);
        let child = Command::new(&self.binary_path)
            .args(&args)
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(false)
            .spawn()?;

        let pid = child.id().ok_or_else(|| {
            GatewayError::Io("spawned backend process has no pid (already reaped)".into())
        })?;

        Ok(ProcessHandle {
            port: desc.port.expect("validated above"),
            pid,
            child,
        })
    }

    async fn stop(&self, handle: ProcessHandle) -> Result<(), GatewayError> {
        stop_child(handle).await
    }

    async fn wait_ready(&self, port: u16, deadline: Duration) -> Result<(), GatewayError> {
        let url = format!("http://127.0.0.1:{port}/v1/models");
        poll_ready(&self.client, &url, port, deadline).await
    }

    async fn is_up(&self, port: u16) -> bool {
        let url = format!("http://127.0.0.1:{port}/v1/models");
        single_shot_up(&self.client, &url).await
    }
}
