//! Request pipeline (C7, §4.7) and process-start initialization tasks.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use sysinfo::System;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::budget::{resolve_max_tokens, truncate};
use crate::config::{BackendKind, GatewayDescriptors, ModelDescriptor};
use crate::driver::BackendDriver;
use crate::orchestrator::Orchestrator;
use crate::proxy::{resolve_timeout, ByteStream, Proxy, ProxyResponse};
use crate::registry::ModelRegistry;
use crate::router::Router;
use crate::scheduler::GpuScheduler;
use crate::status::{CategoryStatusPayload, PromptSource, StatusBus, SystemPromptPayload};
use crate::types::{CancelSignal, GatewayError, RequestPlan};

/// Deadline for the classifier's own cold start at boot (§4.7).
const CLASSIFIER_BOOT_DEADLINE: Duration = Duration::from_secs(60);

/// The outcome of running the whole per-request pipeline up to the point of
/// proxying, carried back to the HTTP layer so it can stream or serialize
/// the right thing.
pub enum PipelineOutcome {
    Streaming(ByteStream),
    Complete(ProxyResponse),
}

impl std::fmt::Debug for PipelineOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Streaming(_) => f.debug_tuple("Streaming").field(&"<ByteStream>").finish(),
            Self::Complete(resp) => f.debug_tuple("Complete").field(resp).finish(),
        }
    }
}

/// Composes C2-C6 and C8 behind a single per-request entry point.
pub struct Pipeline {
    descriptors: GatewayDescriptors,
    scheduler: GpuScheduler,
    orchestrator: Arc<Orchestrator>,
    router: Arc<Router>,
    proxy: Proxy,
    registry: Arc<ModelRegistry>,
    status: StatusBus,
    classifier_port: RwLock<Option<u16>>,
}

impl Pipeline {
    pub fn new(
        descriptors: GatewayDescriptors,
        scheduler: GpuScheduler,
        orchestrator: Arc<Orchestrator>,
        router: Arc<Router>,
        registry: Arc<ModelRegistry>,
        status: StatusBus,
    ) -> Self {
        Self {
            descriptors,
            scheduler,
            orchestrator,
            router,
            proxy: Proxy::new(),
            registry,
            status,
            classifier_port: RwLock::new(None),
        }
    }

    pub fn descriptors(&self) -> &GatewayDescriptors {
        &self.descriptors
    }

    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    pub fn status(&self) -> &StatusBus {
        &self.status
    }

    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    /// Initialization-time tasks described in §4.7: sweep stale local
    /// backend ports, then start the classifier and wait for readiness.
    /// Classifier startup failure is logged and swallowed - the router then
    /// always falls back to `default` (§4.7).
    pub async fn bootstrap(&self, classifier_driver: &dyn BackendDriver) {
        self.sweep_stale_ports().await;

        let Some(router_cfg) = self.descriptors.router.as_ref() else {
            warn!("no router config present; classifier alias will always resolve to default category");
            return;
        };

        let classifier_desc = ModelDescriptor {
            id: router_cfg.model_id.clone(),
            kind: BackendKind::LocalText,
            port: Some(router_cfg.port),
            repo: None,
            file: None,
            mmproj: None,
            context: router_cfg.context,
            max_tokens: None,
            timeout: None,
            temperature: None,
            top_p: None,
            performance: None,
            language: None,
            threads: None,
            endpoint: None,
            api_key: None,
            model: None,
            headers: None,
            system_prompt: router_cfg.system_prompt.clone(),
            system_prompt_path: router_cfg.system_prompt_path.clone(),
            gpu: true,
        };

        match classifier_driver.start(&classifier_desc).await {
            Ok(handle) => {
                let pid = handle.pid;
                match classifier_driver.wait_ready(router_cfg.port, CLASSIFIER_BOOT_DEADLINE).await {
                    Ok(()) => {
                        self.registry.insert(pid, router_cfg.model_id.clone(), Some(router_cfg.port), Some("router".into())).await;
                        *self.classifier_port.write().await = Some(router_cfg.port);
                        info!(port = router_cfg.port, "classifier backend ready");
                    }
                    Err(e) => warn!(error = %e, "classifier backend failed to become ready; router degrades to default"),
                }
            }
            Err(e) => warn!(error = %e, "classifier backend failed to start; router degrades to default"),
        }
    }

    /// Per-configured-local-port liveness snapshot, for `/v1/cleanup/status`.
    pub async fn port_statuses(&self) -> Vec<(String, u16, bool)> {
        let mut out = Vec::new();
        for model in &self.descriptors.models {
            if let Some(port) = model.port {
                if matches!(model.kind, BackendKind::LocalText | BackendKind::LocalSpeech) {
                    let up = self.orchestrator.is_backend_up(model.kind, port).await;
                    out.push((model.id.clone(), port, up));
                }
            }
        }
        out
    }

    /// Terminate all local backends except the classifier (`/v1/cleanup`):
    /// evict the orchestrator's owned resident, then sweep for any stray
    /// adopted process still listening on a configured port. Returns, per
    /// non-classifier local port, whether it is still up afterwards.
    pub async fn cleanup(&self) -> Result<Vec<(u16, bool)>, GatewayError> {
        self.orchestrator.evict().await?;
        self.sweep_stale_ports().await;

        let classifier_port = self.descriptors.router.as_ref().map(|r| r.port);
        let mut out = Vec::new();
        for model in &self.descriptors.models {
            let Some(port) = model.port else { continue };
            if Some(port) == classifier_port {
                continue;
            }
            if matches!(model.kind, BackendKind::LocalText | BackendKind::LocalSpeech) {
                let still_up = self.orchestrator.is_backend_up(model.kind, port).await;
                out.push((port, still_up));
            }
        }
        Ok(out)
    }

    /// Resolve a transcription request's target descriptor and make sure the
    /// speech backend it names is the GPU resident, evicting whatever else
    /// holds the slot (§4.1, §6 `/v1/audio/transcriptions`).
    pub async fn ensure_speech_loaded(&self, requested_model: Option<&str>) -> Result<(u16, ModelDescriptor), GatewayError> {
        let model_id = requested_model
            .map(str::to_owned)
            .or_else(|| self.descriptors.default_speech_model.clone())
            .ok_or_else(|| GatewayError::BadRequest("no model specified and no default_speech_model configured".into()))?;

        let descriptor = self
            .descriptors
            .find(&model_id)
            .ok_or_else(|| GatewayError::UnknownModel(model_id.clone()))?
            .clone();

        if !matches!(descriptor.kind, BackendKind::LocalSpeech) {
            return Err(GatewayError::BadRequest(format!(
                "model '{model_id}' is not a speech backend"
            )));
        }

        let orchestrator = Arc::clone(&self.orchestrator);
        let desc_for_gpu = descriptor.clone();
        let port = self
            .scheduler
            .with_gpu(|| async move { orchestrator.ensure_loaded(&desc_for_gpu).await })
            .await?
            .ok_or_else(|| GatewayError::Internal(format!("local_speech descriptor '{model_id}' resolved to no port")))?;

        Ok((port, descriptor))
    }

    /// Kill any process listening on a configured local-model port other
    /// than the classifier's, reusing the same logic as the `/v1/cleanup`
    /// endpoint (§4.7, §9 Open Question: parameterized on the configured
    /// classifier port rather than a hardcoded one).
    async fn sweep_stale_ports(&self) {
        let classifier_port = self.descriptors.router.as_ref().map(|r| r.port);
        let mut system = System::new_all();
        system.refresh_all();

        for port in self.descriptors.local_ports() {
            if Some(port) == classifier_port {
                continue;
            }
            for (pid, process) in system.processes() {
                let matches_port = process.cmd().iter().any(|arg| arg.to_string_lossy().contains(&port.to_string()));
                if matches_port {
                    info!(pid = pid.as_u32(), port, "terminating residual backend process from a previous run");
                    process.kill();
                }
            }
        }
    }

    /// Run the full per-request pipeline up to (but not including) writing
    /// the HTTP response (§4.7).
    pub async fn handle_chat(
        &self,
        requested_model: Option<&str>,
        mut messages: Vec<Value>,
        requested_max_tokens: Option<u32>,
        stream: bool,
        timeout_header_seconds: Option<u64>,
        cancel: CancelSignal,
        passthrough: serde_json::Map<String, Value>,
    ) -> Result<PipelineOutcome, GatewayError> {
        // Step 2: route.
        let plan = self
            .router
            .route(requested_model, &messages, &self.descriptors, *self.classifier_port.read().await)
            .await?;

        // Step 3: ensure loaded. Remote targets skip the GPU section
        // entirely - they share the GPU with whatever local resident is
        // already running and never enter `withGpu` - but `ensureLoaded`
        // still runs directly so the orchestrator records the logical
        // remote marker and emits status (§4.3 step 1, §4.7 step 3).
        let port = if matches!(plan.descriptor.kind, BackendKind::RemoteHttp) {
            self.orchestrator.ensure_loaded(&plan.descriptor).await?.unwrap_or(0)
        } else {
            let orchestrator = Arc::clone(&self.orchestrator);
            let descriptor = plan.descriptor.clone();
            self.scheduler
                .with_gpu(|| async move { orchestrator.ensure_loaded(&descriptor).await })
                .await?
                .ok_or_else(|| GatewayError::Internal(format!("local descriptor '{}' resolved to no port", plan.descriptor.id)))?
        };

        // Step 4: truncate, if a context budget is configured.
        if let Some(context) = plan.descriptor.context {
            messages = truncate(&messages, context);
        }

        // Step 5: resolve max_tokens.
        let max_tokens = resolve_max_tokens(requested_max_tokens, plan.descriptor.forwarded_max_tokens());

        // Step 6: system-prompt injection priority.
        let (messages, prompt_used) = self.inject_system_prompt(messages, &plan)?;

        // Step 7: publish classification and prompt status before proxying.
        if let Some(category) = &plan.category {
            self.status.publish_category_status(CategoryStatusPayload {
                category: Some(category.clone()),
                model_id: plan.target_model_id.clone(),
            });
            self.registry.update_category_for_model(&plan.target_model_id, category).await;
        }
        self.status.publish_system_prompt_used(prompt_used);

        // Step 8: proxy. Request-level sampling params and other fields
        // (temperature, top_p, tools, ...) ride along verbatim - the gateway
        // does not reconcile them against the descriptor's own spawn-time
        // knobs (§5 sampling parameter precedence).
        let mut body = passthrough;
        body.insert("model".into(), Value::String(plan.target_model_id.clone()));
        body.insert("messages".into(), Value::Array(messages));
        body.insert("max_tokens".into(), serde_json::json!(max_tokens));
        body.insert("stream".into(), Value::Bool(stream));
        let body = Value::Object(body);

        let timeout = resolve_timeout(timeout_header_seconds, &plan.descriptor);

        if stream {
            let bytes = self.proxy.forward_stream(&plan.descriptor, port, body, timeout, cancel).await?;
            Ok(PipelineOutcome::Streaming(bytes))
        } else {
            let resp = self.proxy.forward(&plan.descriptor, port, body, timeout, cancel).await?;
            Ok(PipelineOutcome::Complete(resp))
        }
    }

    /// §4.7 step 6: leading user-provided `system` message wins unless the
    /// process-wide `ignoreRoleSystem` flag says otherwise; fall back to the
    /// category-level prompt, then the model-level prompt, then nothing.
    fn inject_system_prompt(&self, messages: Vec<Value>, plan: &RequestPlan) -> Result<(Vec<Value>, SystemPromptPayload), GatewayError> {
        let leading_is_system = messages.first().and_then(|m| m.get("role")).and_then(Value::as_str) == Some("system");

        if leading_is_system && !self.descriptors.ignore_role_system {
            let text = messages[0].get("content").and_then(Value::as_str).unwrap_or_default().to_owned();
            return Ok((
                messages,
                SystemPromptPayload { text, source: PromptSource::UserProvided },
            ));
        }

        let stripped: Vec<Value> = messages
            .into_iter()
            .filter(|m| m.get("role").and_then(Value::as_str) != Some("system"))
            .collect();

        let (prompt, source) = if let Some(category_prompt) = &plan.category_system_prompt {
            (Some(category_prompt.clone()), PromptSource::CategoryLevel)
        } else if let Some(model_prompt) = plan.descriptor.resolve_system_prompt()? {
            (Some(model_prompt), PromptSource::ModelLevel)
        } else {
            (None, PromptSource::None)
        };

        let mut out = Vec::with_capacity(stripped.len() + 1);
        let payload = match &prompt {
            Some(text) if !text.is_empty() => {
                out.push(serde_json::json!({"role": "system", "content": text}));
                SystemPromptPayload { text: text.clone(), source }
            }
            _ => SystemPromptPayload { text: String::new(), source: PromptSource::None },
        };
        out.extend(stripped);

        Ok((out, payload))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::CategoryBinding;
    use serde_json::json;
    use std::collections::HashMap;

    fn plan_with_category(prompt: Option<&str>) -> RequestPlan {
        RequestPlan {
            target_model_id: "coder".into(),
            descriptor: ModelDescriptor {
                id: "coder".into(),
                kind: BackendKind::LocalText,
                port: Some(8081),
                repo: None,
                file: None,
                mmproj: None,
                context: None,
                max_tokens: None,
                timeout: None,
                temperature: None,
                top_p: None,
                performance: None,
                language: None,
                threads: None,
                endpoint: None,
                api_key: None,
                model: None,
                headers: None,
                system_prompt: Some("model-level fallback".into()),
                system_prompt_path: None,
                gpu: true,
            },
            category: Some("code".into()),
            category_system_prompt: prompt.map(str::to_owned),
        }
    }

    fn bare_pipeline() -> Pipeline {
        let descriptors = GatewayDescriptors {
            models: vec![],
            categories: HashMap::new(),
            router: None,
            ignore_role_system: false,
            default_speech_model: None,
        };
        Pipeline::new(
            descriptors,
            GpuScheduler::new(),
            Arc::new(Orchestrator::new(
                Arc::new(crate::driver::text::TextDriver::new("/bin/true")),
                Arc::new(crate::driver::speech::SpeechDriver::new("/bin/true")),
                StatusBus::new(),
            )),
            Arc::new(Router::new()),
            Arc::new(ModelRegistry::new()),
            StatusBus::new(),
        )
    }

    #[test]
    fn user_provided_system_message_wins_when_flag_off() {
        let pipeline = bare_pipeline();
        let messages = vec![json!({"role": "system", "content": "Pirate."}), json!({"role": "user", "content": "hi"})];
        let plan = plan_with_category(Some("category prompt"));
        let (out, payload) = pipeline.inject_system_prompt(messages, &plan).unwrap();
        assert_eq!(out[0]["content"], "Pirate.");
        assert_eq!(payload.source, PromptSource::UserProvided);
    }

    #[test]
    fn category_prompt_wins_over_model_prompt_when_no_user_system() {
        let pipeline = bare_pipeline();
        let messages = vec![json!({"role": "user", "content": "hi"})];
        let plan = plan_with_category(Some("category prompt"));
        let (out, payload) = pipeline.inject_system_prompt(messages, &plan).unwrap();
        assert_eq!(out[0]["content"], "category prompt");
        assert_eq!(payload.source, PromptSource::CategoryLevel);
    }

    #[test]
    fn model_prompt_is_used_when_no_category_prompt() {
        let pipeline = bare_pipeline();
        let messages = vec![json!({"role": "user", "content": "hi"})];
        let plan = plan_with_category(None);
        let (out, payload) = pipeline.inject_system_prompt(messages, &plan).unwrap();
        assert_eq!(out[0]["content"], "model-level fallback");
        assert_eq!(payload.source, PromptSource::ModelLevel);
    }

    #[test]
    fn ignore_role_system_strips_user_system_message_entirely() {
        let mut pipeline = bare_pipeline();
        pipeline.descriptors.ignore_role_system = true;
        pipeline.descriptors.categories.insert("code".into(), CategoryBinding::Simple("coder".into()));
        let messages = vec![json!({"role": "system", "content": "Pirate."}), json!({"role": "user", "content": "hi"})];
        let plan = plan_with_category(None);
        let (out, _payload) = pipeline.inject_system_prompt(messages, &plan).unwrap();
        assert!(out.iter().all(|m| m["role"] != "system" || m["content"] == "model-level fallback"));
        assert!(!out.iter().any(|m| m["content"] == "Pirate."));
    }

    fn descriptor(id: &str, kind: BackendKind, port: u16) -> ModelDescriptor {
        ModelDescriptor {
            id: id.into(),
            kind,
            port: Some(port),
            repo: None,
            file: None,
            mmproj: None,
            context: None,
            max_tokens: None,
            timeout: None,
            temperature: None,
            top_p: None,
            performance: None,
            language: None,
            threads: None,
            endpoint: None,
            api_key: None,
            model: None,
            headers: None,
            system_prompt: None,
            system_prompt_path: None,
            gpu: true,
        }
    }

    #[tokio::test]
    async fn port_statuses_reports_every_configured_local_model_as_down_when_untouched() {
        let mut pipeline = bare_pipeline();
        pipeline.descriptors.models = vec![
            descriptor("coder", BackendKind::LocalText, 8081),
            descriptor("whisper", BackendKind::LocalSpeech, 8090),
        ];

        let statuses = pipeline.port_statuses().await;
        assert_eq!(statuses.len(), 2);
        assert!(statuses.iter().all(|(_, _, up)| !up));
    }

    #[tokio::test]
    async fn cleanup_excludes_the_configured_classifier_port() {
        let mut pipeline = bare_pipeline();
        pipeline.descriptors.models = vec![
            descriptor("lols-smart", BackendKind::LocalText, 8081),
            descriptor("coder", BackendKind::LocalText, 8082),
        ];
        pipeline.descriptors.router = Some(crate::config::RouterConfig {
            model_id: "lols-smart".into(),
            port: 8081,
            context: None,
            system_prompt: None,
            system_prompt_path: None,
        });

        let report = pipeline.cleanup().await.unwrap();
        assert_eq!(report, vec![(8082, false)]);
    }

    #[tokio::test]
    async fn ensure_speech_loaded_rejects_a_text_model_id() {
        let mut pipeline = bare_pipeline();
        pipeline.descriptors.models = vec![descriptor("coder", BackendKind::LocalText, 8081)];
        let err = pipeline.ensure_speech_loaded(Some("coder")).await.unwrap_err();
        assert!(matches!(err, GatewayError::BadRequest(_)));
    }

    #[tokio::test]
    async fn ensure_speech_loaded_rejects_an_unknown_model_id() {
        let pipeline = bare_pipeline();
        let err = pipeline.ensure_speech_loaded(Some("nope")).await.unwrap_err();
        assert!(matches!(err, GatewayError::UnknownModel(_)));
    }

    #[tokio::test]
    async fn handle_chat_runs_ensure_loaded_for_a_remote_target() {
        // §4.3 step 1 / §4.7 step 3: a remote target still drives
        // `ensureLoaded` (to set the logical marker and emit status) even
        // though it never enters the GPU section. The remote descriptor
        // here has no endpoint configured, so the proxy call fails fast
        // with `ConfigInvalid` - this test only needs to observe that
        // `ensureLoaded` ran before that failure, not a real network call.
        let mut pipeline = bare_pipeline();
        pipeline.descriptors.models = vec![{
            let mut d = descriptor("remote-gpt", BackendKind::RemoteHttp, 0);
            d.port = None;
            d.endpoint = None;
            d
        }];
        let mut sub = pipeline.status.subscribe();

        let err = pipeline
            .handle_chat(
                Some("remote-gpt"),
                vec![json!({"role": "user", "content": "hi"})],
                None,
                false,
                None,
                CancelSignal::new(),
                serde_json::Map::new(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, GatewayError::ConfigInvalid(_)));
        assert_eq!(pipeline.orchestrator.current_model().await.as_deref(), Some("remote-gpt"));
        assert_eq!(sub.model_status.borrow().model_id.as_deref(), Some("remote-gpt"));
    }

    #[tokio::test]
    async fn ensure_speech_loaded_requires_a_model_or_configured_default() {
        let pipeline = bare_pipeline();
        let err = pipeline.ensure_speech_loaded(None).await.unwrap_err();
        assert!(matches!(err, GatewayError::BadRequest(_)));
    }
}
