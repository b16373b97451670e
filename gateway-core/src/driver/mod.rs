//! Backend process lifecycle (C1, §4.1).
//!
//! Two variants, [`text::TextDriver`] and [`speech::SpeechDriver`], share the
//! [`BackendDriver`] contract. Process stdout/stderr are inherited; failures
//! observed after spawn surface as `Result`s rather than panics.

pub mod speech;
pub mod text;

use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Child;
use tracing::warn;

use crate::config::ModelDescriptor;
use crate::types::GatewayError;

/// An owned child process bound to a local port.
///
/// Dropping a handle without calling [`BackendDriver::stop`] leaks the
/// process; the orchestrator always routes eviction through `stop`.
pub struct ProcessHandle {
    pub port: u16,
    pub pid: u32,
    child: Child,
}

impl std::fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("port", &self.port)
            .field("pid", &self.pid)
            .finish()
    }
}

#[async_trait]
pub trait BackendDriver: Send + Sync {
    /// Launch an external process bound to `127.0.0.1:desc.port`.
    ///
    /// Fails fast if the backend binary or the model file do not exist.
    async fn start(&self, desc: &ModelDescriptor) -> Result<ProcessHandle, GatewayError>;

    /// Terminate the process. Sends SIGTERM; escalates to SIGKILL after 30s.
    /// Idempotent: calling this on an already-exited child is a no-op.
    async fn stop(&self, handle: ProcessHandle) -> Result<(), GatewayError>;

    /// Poll the backend's readiness endpoint until it succeeds or `deadline`
    /// elapses.
    async fn wait_ready(&self, port: u16, deadline: Duration) -> Result<(), GatewayError>;

    /// Single-shot readiness predicate with a short timeout.
    async fn is_up(&self, port: u16) -> bool;
}

const POLL_INTERVAL: Duration = Duration::from_millis(150);
const SINGLE_SHOT_TIMEOUT: Duration = Duration::from_millis(500);
const TERMINATE_GRACE: Duration = Duration::from_secs(30);

/// Poll `url` every [`POLL_INTERVAL`] until it returns a success status, or
/// `deadline` elapses.
async fn poll_ready(
    client: &reqwest::Client,
    url: &str,
    port: u16,
    deadline: Duration,
) -> Result<(), GatewayError> {
    let start = tokio::time::Instant::now();
    loop {
        if let Ok(resp) = client.get(url).timeout(POLL_INTERVAL).send().await {
            if resp.status().is_success() {
                return Ok(());
            }
        }
        if start.elapsed() >= deadline {
            return Err(GatewayError::ColdStartTimeout {
                port,
                timeout: deadline,
            });
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

/// Single-shot readiness check with a short timeout.
async fn single_shot_up(client: &reqwest::Client, url: &str) -> bool {
    client
        .get(url)
        .timeout(SINGLE_SHOT_TIMEOUT)
        .send()
        .await
        .map(|r| r.status().is_success())
        .unwrap_or(false)
}

/// Terminate-then-escalate shutdown shared by both driver variants.
async fn stop_child(mut handle: ProcessHandle) -> Result<(), GatewayError> {
    // Already exited (e.g. crashed) - nothing to do.
    if let Ok(Some(_)) = handle.child.try_wait() {
        return Ok(());
    }

    send_terminate(handle.pid);

    let waited = tokio::time::timeout(TERMINATE_GRACE, handle.child.wait()).await;
    match waited {
        Ok(Ok(_)) => Ok(()),
        Ok(Err(e)) => Err(GatewayError::Io(e.to_string())),
        Err(_) => {
            warn!(pid = handle.pid, "backend did not exit within grace period, killing");
            handle.child.start_kill().map_err(GatewayError::from)?;
            handle.child.wait().await.map_err(GatewayError::from)?;
            Ok(())
        }
    }
}

#[cfg(unix)]
fn send_terminate(pid: u32) {
    // SAFETY: pid is a valid process id obtained from a live `Child`.
    unsafe {
        libc::kill(pid as libc::pid_t, libc::SIGTERM);
    }
}

#[cfg(not(unix))]
fn send_terminate(_pid: u32) {
    // No graceful-terminate primitive on this platform; the grace-period
    // wait below will still elapse before escalating to a hard kill.
}

fn check_exists(label: &str, path: &str) -> Result<(), GatewayError> {
    if !std::path::Path::new(path).exists() {
        return Err(GatewayError::ConfigInvalid(format!(
            "{label} does not exist: {path}"
        )));
    }
    Ok(())
}
