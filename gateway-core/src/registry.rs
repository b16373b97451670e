//! `ModelRegistry` (§3): a best-effort `pid -> (model, port, category)` map
//! consulted solely by telemetry consumers. It does not gate scheduling and
//! tolerates stale entries (§3, Lifecycle summary).

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

#[derive(Debug, Clone)]
pub struct RegistryEntry {
    pub model_id: String,
    pub port: Option<u16>,
    pub category: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ModelRegistry {
    inner: Arc<RwLock<HashMap<u32, RegistryEntry>>>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, pid: u32, model_id: impl Into<String>, port: Option<u16>, category: Option<String>) {
        self.inner.write().await.insert(
            pid,
            RegistryEntry {
                model_id: model_id.into(),
                port,
                category,
            },
        );
    }

    /// Update the `category` field of every entry whose `model_id` equals or
    /// contains the classified model id (§4.8 `categoryStatus` side effect).
    pub async fn update_category_for_model(&self, model_id: &str, category: &str) {
        let mut guard = self.inner.write().await;
        for entry in guard.values_mut() {
            if entry.model_id == model_id || entry.model_id.contains(model_id) {
                entry.category = Some(category.to_owned());
            }
        }
    }

    pub async fn snapshot(&self) -> HashMap<u32, RegistryEntry> {
        self.inner.read().await.clone()
    }
}
