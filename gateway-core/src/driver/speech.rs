//! Speech-transcription backend driver variant (e.g. a `whisper.cpp`-style
//! server).

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use super::{check_exists, poll_ready, single_shot_up, stop_child, BackendDriver, ProcessHandle};
use crate::config::{BackendKind, ModelDescriptor};
use crate::types::GatewayError;

pub struct SpeechDriver {
    binary_path: String,
    client: reqwest::Client,
}

impl SpeechDriver {
    pub fn new(binary_path: impl Into<String>) -> Self {
        Self {
            binary_path: binary_path.into(),
            client: reqwest::Client::new(),
        }
    }

    fn build_args(desc: &ModelDescriptor) -> Vec<String> {
        let mut args = Vec::new();
        let port = desc.port.expect("local_speech descriptor must have a port");
        args.push("--port".into());
        args.push(port.to_string());
        args.push("--host".into());
        args.push("127.0.0.1".into());

        if let Some(file) = &desc.file {
            args.push("--model".into());
            args.push(file.clone());
        }
        args.push("--language".into());
        args.push(desc.language.clone().unwrap_or_else(|| "auto".into()));

        if let Some(threads) = desc.threads {
            args.push("--threads".into());
            args.push(threads.to_string());
        }

        if desc.gpu {
            args.push("--gpu".into());
        } else {
            args.push("--no-gpu".into());
        }

        args
    }
}

#[async_trait]
impl BackendDriver for SpeechDriver {
    async fn start(&self, desc: &ModelDescriptor) -> Result<ProcessHandle, GatewayError> {
        if !matches!(desc.kind, BackendKind::LocalSpeech) {
            return Err(GatewayError::ConfigInvalid(format!(
                "SpeechDriver cannot start non-local_speech descriptor '{}'",
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
        let url = format!("http://127.0.0.1:{port}/health");
        poll_ready(&self.client, &url, port, deadline).await
    }

    async fn is_up(&self, port: u16) -> bool {
        let url = format!("http://127.0.0.1:{port}/health");
        single_shot_up(&self.client, &url).await
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn sample_descriptor() -> ModelDescriptor {
        ModelDescriptor {
            id: "whisper".into(),
            kind: BackendKind::LocalSpeech,
            port: Some(8090),
            repo: None,
            file: Some("/models/ggml-base.bin".into()),
            mmproj: None,
            context: None,
            max_tokens: None,
            timeout: None,
            temperature: None,
            top_p: None,
            performance: None,
            language: Some("en".into()),
            threads: Some(4),
            endpoint: None,
            api_key: None,
            model: None,
            headers: None,
            system_prompt: None,
            system_prompt_path: None,
            gpu: true,
        }
    }

    #[test]
    fn build_args_defaults_language_to_auto_when_unset() {
        let mut desc = sample_descriptor();
        desc.language = None;
        let args = SpeechDriver::build_args(&desc);
        assert!(args.windows(2).any(|w| w == ["--language", "auto"]));
    }

    #[test]
    fn build_args_carries_threads_and_language() {
        let desc = sample_descriptor();
        let args = SpeechDriver::build_args(&desc);
        assert!(args.windows(2).any(|w| w == ["--language", "en"]));
        assert!(args.windows(2).any(|w| w == ["--threads", "4"]));
    }
}
