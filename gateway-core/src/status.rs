//! Status Publisher (C8, §4.8).
//!
//! `modelStatus` buffers its latest value in a `tokio::sync::watch` channel,
//! so a new subscriber immediately observes the current resident model
//! without waiting for the next event. `categoryStatus` and
//! `systemPromptUsed` carry no such replay: a value published before a
//! client subscribes must never reach it, so both ride `tokio::sync::
//! broadcast` channels instead, the same mechanism already used for `log`
//! events. A lagging subscriber drops the oldest buffered events rather than
//! stalling the publisher.

use serde::Serialize;
use tokio::sync::{broadcast, watch};

use crate::config::{BackendKind, PerformanceBundle};

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind")]
pub enum StatusEvent {
    #[serde(rename = "modelStatus")]
    ModelStatus(ModelStatusPayload),
    #[serde(rename = "categoryStatus")]
    CategoryStatus(CategoryStatusPayload),
    #[serde(rename = "systemPromptUsed")]
    SystemPromptUsed(SystemPromptPayload),
    #[serde(rename = "systemMetrics")]
    SystemMetrics(serde_json::Value),
    #[serde(rename = "log")]
    Log(String),
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct ModelStatusPayload {
    pub model_id: Option<String>,
    pub kind: Option<BackendKindView>,
    pub port: Option<u16>,
    pub context: Option<u32>,
    pub system_prompt: Option<String>,
    pub max_tokens: Option<u32>,
    pub timeout: Option<u64>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub performance: Option<PerformanceBundle>,
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKindView {
    LocalText,
    LocalSpeech,
    RemoteHttp,
}

impl From<BackendKind> for BackendKindView {
    fn from(k: BackendKind) -> Self {
        match k {
            BackendKind::LocalText => BackendKindView::LocalText,
            BackendKind::LocalSpeech => BackendKindView::LocalSpeech,
            BackendKind::RemoteHttp => BackendKindView::RemoteHttp,
        }
    }
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct CategoryStatusPayload {
    pub category: Option<String>,
    pub model_id: String,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct SystemPromptPayload {
    pub text: String,
    pub source: PromptSource,
}

#[derive(Debug, Clone, Copy, Serialize, Default, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum PromptSource {
    UserProvided,
    CategoryLevel,
    ModelLevel,
    #[default]
    None,
}

/// Fan-out channel for orchestrator/pipeline decisions (§4.8, §5).
#[derive(Clone)]
pub struct StatusBus {
    model_status: watch::Sender<ModelStatusPayload>,
    category_status: broadcast::Sender<CategoryStatusPayload>,
    system_prompt_used: broadcast::Sender<SystemPromptPayload>,
    log_tx: broadcast::Sender<String>,
    /// Process-wide logging toggle, read-write via a side-channel endpoint.
    logging_enabled: std::sync::Arc<std::sync::atomic::AtomicBool>,
}

impl StatusBus {
    pub fn new() -> Self {
        let (model_status, _) = watch::channel(ModelStatusPayload::default());
        let (category_status, _) = broadcast::channel(64);
        let (system_prompt_used, _) = broadcast::channel(64);
        let (log_tx, _) = broadcast::channel(256);
        Self {
            model_status,
            category_status,
            system_prompt_used,
            log_tx,
            logging_enabled: std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false)),
        }
    }

    pub fn publish_model_status(&self, payload: ModelStatusPayload) {
        let _ = self.model_status.send(payload);
    }

    pub fn publish_category_status(&self, payload: CategoryStatusPayload) {
        let _ = self.category_status.send(payload);
    }

    pub fn publish_system_prompt_used(&self, payload: SystemPromptPayload) {
        let _ = self.system_prompt_used.send(payload);
    }

    pub fn log(&self, line: impl Into<String>) {
        if self.logging_enabled.load(std::sync::atomic::Ordering::Relaxed) {
            let _ = self.log_tx.send(line.into());
        }
    }

    pub fn set_logging(&self, enabled: bool) {
        self.logging_enabled.store(enabled, std::sync::atomic::Ordering::Relaxed);
    }

    pub fn toggle_logging(&self) -> bool {
        let new_value = !self.logging_enabled.load(std::sync::atomic::Ordering::Relaxed);
        self.logging_enabled.store(new_value, std::sync::atomic::Ordering::Relaxed);
        new_value
    }

    pub fn logging_enabled(&self) -> bool {
        self.logging_enabled.load(std::sync::atomic::Ordering::Relaxed)
    }

    /// Subscribe to all four event kinds. A new subscriber immediately
    /// observes the latest `modelStatus` snapshot through the watch
    /// receiver's initial value; `categoryStatus` and `systemPromptUsed`
    /// carry no such replay; only events published after this call arrive.
    pub fn subscribe(&self) -> StatusSubscription {
        StatusSubscription {
            model_status: self.model_status.subscribe(),
            category_status: self.category_status.subscribe(),
            system_prompt_used: self.system_prompt_used.subscribe(),
            log_rx: self.log_tx.subscribe(),
        }
    }
}

impl Default for StatusBus {
    fn default() -> Self {
        Self::new()
    }
}

pub struct StatusSubscription {
    pub model_status: watch::Receiver<ModelStatusPayload>,
    pub category_status: broadcast::Receiver<CategoryStatusPayload>,
    pub system_prompt_used: broadcast::Receiver<SystemPromptPayload>,
    pub log_rx: broadcast::Receiver<String>,
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn new_subscriber_immediately_observes_latest_model_status() {
        let bus = StatusBus::new();
        bus.publish_model_status(ModelStatusPayload {
            model_id: Some("coder".into()),
            ..Default::default()
        });

        let sub = bus.subscribe();
        assert_eq!(sub.model_status.borrow().model_id.as_deref(), Some("coder"));
    }

    #[tokio::test]
    async fn new_subscriber_does_not_see_a_category_status_published_before_it_subscribed() {
        let bus = StatusBus::new();
        bus.publish_category_status(CategoryStatusPayload {
            category: Some("coding".into()),
            model_id: "coder".into(),
        });

        let mut sub = bus.subscribe();
        assert!(sub.category_status.try_recv().is_err());

        bus.publish_category_status(CategoryStatusPayload {
            category: Some("chat".into()),
            model_id: "chatty".into(),
        });
        assert_eq!(sub.category_status.try_recv().unwrap().model_id, "chatty");
    }

    #[tokio::test]
    async fn new_subscriber_does_not_see_a_system_prompt_published_before_it_subscribed() {
        let bus = StatusBus::new();
        bus.publish_system_prompt_used(SystemPromptPayload {
            text: "stale".into(),
            source: PromptSource::UserProvided,
        });

        let mut sub = bus.subscribe();
        assert!(sub.system_prompt_used.try_recv().is_err());

        bus.publish_system_prompt_used(SystemPromptPayload {
            text: "fresh".into(),
            source: PromptSource::CategoryLevel,
        });
        assert_eq!(sub.system_prompt_used.try_recv().unwrap().text, "fresh");
    }

    #[tokio::test]
    async fn log_events_are_dropped_when_logging_disabled() {
        let bus = StatusBus::new();
        let mut sub = bus.subscribe();
        bus.log("should be dropped");
        assert!(sub.log_rx.try_recv().is_err());

        bus.set_logging(true);
        bus.log("should arrive");
        assert_eq!(sub.log_rx.try_recv().unwrap(), "should arrive");
    }
}
