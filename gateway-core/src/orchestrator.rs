//! Single-resident-model orchestration (C3, §4.3).
//!
//! At most one local backend process is ever alive. `ensure_loaded` is the
//! sole mutator of that state and always runs inside the caller's
//! [`crate::scheduler::GpuScheduler`] critical section, so its steps never
//! interleave with another model swap.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::info;

use crate::config::{BackendKind, ModelDescriptor};
use crate::driver::{BackendDriver, ProcessHandle};
use crate::status::{BackendKindView, ModelStatusPayload, StatusBus};
use crate::types::GatewayError;

/// Deadline for a cold load (first-time download plus model load can be
/// slow; §4.3 step 5).
const COLD_START_DEADLINE: Duration = Duration::from_secs(5 * 60);

/// One resident model: either a local process this orchestrator owns, one
/// discovered already listening on its configured port (adopted rather than
/// spawned, §4.3 step 4), or a logical marker recording that the last
/// request targeted a `remote_http` descriptor (no port, no process, never
/// owned - §4.3 step 1).
struct ResidentModel {
    model_id: String,
    kind: BackendKind,
    port: Option<u16>,
    owned: bool,
    proc_handle: Option<ProcessHandle>,
}

/// Owns the single local backend slot and the drivers that can start/stop
/// processes of each kind.
pub struct Orchestrator {
    text_driver: Arc<dyn BackendDriver>,
    speech_driver: Arc<dyn BackendDriver>,
    status: StatusBus,
    resident: Mutex<Option<ResidentModel>>,
}

impl Orchestrator {
    pub fn new(text_driver: Arc<dyn BackendDriver>, speech_driver: Arc<dyn BackendDriver>, status: StatusBus) -> Self {
        Self {
            text_driver,
            speech_driver,
            status,
            resident: Mutex::new(None),
        }
    }

    fn driver_for(&self, kind: BackendKind) -> &Arc<dyn BackendDriver> {
        match kind {
            BackendKind::LocalText => &self.text_driver,
            BackendKind::LocalSpeech => &self.speech_driver,
            BackendKind::RemoteHttp => unreachable!("remote_http never resolves to a driver"),
        }
    }

    /// Ensure `desc` is ready to serve and return the port it is listening
    /// on, or `None` for a `remote_http` descriptor (no local port exists).
    /// Must be called while holding the GPU permit for local kinds; remote
    /// descriptors need no permit, only the logical marker set below (§4.3
    /// step 1).
    pub async fn ensure_loaded(&self, desc: &ModelDescriptor) -> Result<Option<u16>, GatewayError> {
        if matches!(desc.kind, BackendKind::RemoteHttp) {
            let mut guard = self.resident.lock().await;
            *guard = Some(ResidentModel {
                model_id: desc.id.clone(),
                kind: desc.kind,
                port: None,
                owned: false,
                proc_handle: None,
            });
            drop(guard);
            self.publish_status(desc, None);
            return Ok(None);
        }

        let port = desc
            .port
            .ok_or_else(|| GatewayError::ConfigInvalid(format!("local descriptor '{}' has no port", desc.id)))?;

        let mut guard = self.resident.lock().await;

        // Step 2: already the resident model, nothing to do.
        if let Some(resident) = guard.as_ref() {
            if resident.model_id == desc.id && resident.port == Some(port) {
                return Ok(Some(port));
            }
        }

        // Step 3: evict whatever else is resident, if owned by us.
        if let Some(resident) = guard.take() {
            if resident.owned {
                if let Some(handle) = resident.proc_handle {
                    info!(model = %resident.model_id, "evicting resident model");
                    self.driver_for(resident.kind).stop(handle).await?;
                }
            }
        }

        let driver = self.driver_for(desc.kind);

        // Step 4: adopt an already-running process on the configured port
        // rather than spawning a duplicate.
        if driver.is_up(port).await {
            info!(model = %desc.id, port, "adopting already-running backend");
            *guard = Some(ResidentModel {
                model_id: desc.id.clone(),
                kind: desc.kind,
                port: Some(port),
                owned: false,
                proc_handle: None,
            });
            self.publish_status(desc, Some(port));
            return Ok(Some(port));
        }

        // Step 5: cold start.
        info!(model = %desc.id, port, "cold starting backend");
        let handle = driver.start(desc).await?;
        driver.wait_ready(port, COLD_START_DEADLINE).await?;

        *guard = Some(ResidentModel {
            model_id: desc.id.clone(),
            kind: desc.kind,
            port: Some(port),
            owned: true,
            proc_handle: Some(handle),
        });
        self.publish_status(desc, Some(port));
        Ok(Some(port))
    }

    fn publish_status(&self, desc: &ModelDescriptor, port: Option<u16>) {
        self.status.publish_model_status(ModelStatusPayload {
            model_id: Some(desc.id.clone()),
            kind: Some(BackendKindView::from(desc.kind)),
            port,
            context: desc.context,
            system_prompt: desc.resolve_system_prompt().ok().flatten(),
            max_tokens: Some(desc.forwarded_max_tokens()),
            timeout: Some(desc.timeout_seconds()),
            temperature: desc.temperature,
            top_p: desc.top_p,
            performance: desc.performance.clone(),
        });
    }

    pub async fn current_model(&self) -> Option<String> {
        self.resident.lock().await.as_ref().map(|r| r.model_id.clone())
    }

    pub async fn current_port(&self) -> Option<u16> {
        self.resident.lock().await.as_ref().and_then(|r| r.port)
    }

    /// Single-shot liveness probe for an arbitrary configured port, used by
    /// the `/v1/cleanup/status` admin endpoint rather than the resident slot
    /// itself (a port may be live without being the current resident, e.g.
    /// immediately after an eviction race).
    pub async fn is_backend_up(&self, kind: BackendKind, port: u16) -> bool {
        self.driver_for(kind).is_up(port).await
    }

    /// Evict whatever is resident, if owned. Used by the `/v1/cleanup`
    /// family of admin endpoints (§6).
    pub async fn evict(&self) -> Result<(), GatewayError> {
        let mut guard = self.resident.lock().await;
        if let Some(resident) = guard.take() {
            if resident.owned {
                if let Some(handle) = resident.proc_handle {
                    self.driver_for(resident.kind).stop(handle).await?;
                }
            }
        }
        Ok(())
    }
}
