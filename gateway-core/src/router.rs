//! Classification-based request routing (C4, §4.4).

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::RwLock;
use tracing::warn;

use crate::config::{CategoryBinding, GatewayDescriptors, CLASSIFIER_ALIAS, DEFAULT_CATEGORY};
use crate::content::{extract_text, has_image};
use crate::types::{GatewayError, RequestPlan};

const CLASSIFIER_DEADLINE: Duration = Duration::from_secs(5);

/// Routes a parsed chat request to a target model id, consulting the
/// classifier only when structural rules don't already decide it.
pub struct Router {
    client: reqwest::Client,
    /// Side-channel debug override (§4.4 step 1, §6 `/test/model`).
    test_model_id: RwLock<Option<String>>,
}

impl Router {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            test_model_id: RwLock::new(None),
        }
    }

    pub async fn set_test_model(&self, model_id: Option<String>) {
        *self.test_model_id.write().await = model_id;
    }

    pub async fn test_model(&self) -> Option<String> {
        self.test_model_id.read().await.clone()
    }

    /// Decide where a chat request should go (§4.4).
    ///
    /// `classifier_port` is `None` when the classifier backend failed to
    /// start at boot; the router then always falls back to `default`
    /// (§4.7's "router degrades to always returning default").
    pub async fn route(
        &self,
        requested_model: Option<&str>,
        messages: &[Value],
        descriptors: &GatewayDescriptors,
        classifier_port: Option<u16>,
    ) -> Result<RequestPlan, GatewayError> {
        // Step 1: test pin.
        if let Some(pinned) = self.test_model_id.read().await.clone() {
            let descriptor = descriptors
                .find(&pinned)
                .cloned()
                .ok_or_else(|| GatewayError::UnknownModel(pinned.clone()))?;
            return Ok(RequestPlan {
                target_model_id: pinned,
                descriptor,
                category: None,
                category_system_prompt: None,
            });
        }

        // Step 2: explicit model.
        if let Some(model) = requested_model {
            if model != CLASSIFIER_ALIAS {
                let descriptor = descriptors
                    .find(model)
                    .cloned()
                    .ok_or_else(|| GatewayError::UnknownModel(model.to_owned()))?;
                return Ok(RequestPlan {
                    target_model_id: model.to_owned(),
                    descriptor,
                    category: None,
                    category_system_prompt: None,
                });
            }
        }

        // Step 3: classifier alias (explicit `lols-smart` or no model named).
        let category = self.classify(messages, descriptors, classifier_port).await;

        // Step 4: resolve the category binding.
        let binding = descriptors
            .binding_for(&category)
            .ok_or_else(|| GatewayError::ConfigInvalid(format!("no category binding for '{category}' and no default")))?;

        let system_prompt = binding.resolve_system_prompt()?;
        let target_model_id = binding.model_id().to_owned();
        let descriptor = descriptors
            .find(&target_model_id)
            .cloned()
            .ok_or_else(|| GatewayError::ConfigInvalid(format!("category binding targets unknown model '{target_model_id}'")))?;

        Ok(RequestPlan {
            target_model_id,
            descriptor,
            category: Some(category),
            category_system_prompt: system_prompt,
        })
    }

    async fn classify(&self, messages: &[Value], descriptors: &GatewayDescriptors, classifier_port: Option<u16>) -> String {
        // Step 3a: last user message.
        let last_user_text = messages
            .iter()
            .rev()
            .find(|m| m.get("role").and_then(Value::as_str) == Some("user"))
            .map(|m| extract_text(m.get("content").unwrap_or(&Value::Null)))
            .unwrap_or_default();

        if last_user_text.trim().is_empty() {
            return DEFAULT_CATEGORY.to_owned();
        }

        // Step 3b: vision structural override - classifier is never consulted.
        if messages.iter().any(|m| has_image(m.get("content").unwrap_or(&Value::Null))) {
            return "vision".to_owned();
        }

        // Step 3c/3d: consult the classifier, falling back to default on any
        // failure kind.
        let Some(port) = classifier_port else {
            return DEFAULT_CATEGORY.to_owned();
        };

        match self.call_classifier(port, descriptors, &last_user_text).await {
            Ok(raw) => {
                let normalized = raw.trim().to_lowercase();
                if descriptors.categories.contains_key(&normalized) {
                    normalized
                } else {
                    DEFAULT_CATEGORY.to_owned()
                }
            }
            Err(e) => {
                warn!(error = %e, "classifier call failed, defaulting category");
                DEFAULT_CATEGORY.to_owned()
            }
        }
    }

    async fn call_classifier(&self, port: u16, descriptors: &GatewayDescriptors, user_text: &str) -> Result<String, GatewayError> {
        let router_cfg = descriptors
            .router
            .as_ref()
            .ok_or_else(|| GatewayError::ConfigInvalid("no router config for classifier".into()))?;

        let system_prompt = router_cfg.materialize_prompt(&descriptors.category_keys())?;

        let body = json!({
            "model": router_cfg.model_id,
            "messages": [
                {"role": "system", "content": system_prompt},
                {"role": "user", "content": user_text},
            ],
            "max_tokens": 10,
            "temperature": 0.1,
            "stream": false,
        });

        let url = format!("http://127.0.0.1:{port}/v1/chat/completions");
        let resp = self
            .client
            .post(&url)
            .json(&body)
            .timeout(CLASSIFIER_DEADLINE)
            .send()
            .await
            .map_err(GatewayError::from)?;

        if !resp.status().is_success() {
            return Err(GatewayError::UpstreamHttp {
                status: resp.status().as_u16(),
                body: String::new(),
            });
        }

        let parsed: Value = resp.json().await.map_err(GatewayError::from)?;
        parsed
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .map(str::to_owned)
            .ok_or_else(|| GatewayError::Internal("malformed classifier response".into()))
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::{BackendKind, ModelDescriptor, RouterConfig};
    use serde_json::json;
    use std::collections::HashMap;

    fn stub_descriptor(id: &str, port: u16) -> ModelDescriptor {
        ModelDescriptor {
            id: id.into(),
            kind: BackendKind::LocalText,
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

    fn descriptors_with_categories() -> GatewayDescriptors {
        let mut categories = HashMap::new();
        categories.insert("code".to_owned(), CategoryBinding::Simple("coder".into()));
        categories.insert("vision".to_owned(), CategoryBinding::Simple("vision-model".into()));
        categories.insert("default".to_owned(), CategoryBinding::Simple("general".into()));

        GatewayDescriptors {
            models: vec![
                stub_descriptor("coder", 8081),
                stub_descriptor("vision-model", 8082),
                stub_descriptor("general", 8083),
                stub_descriptor("pinned-model", 8084),
            ],
            categories,
            router: Some(RouterConfig {
                model_id: "router".into(),
                port: 3001,
                context: None,
                system_prompt: Some("Categories: {CATEGORIES}".into()),
                system_prompt_path: None,
            }),
            ignore_role_system: false,
            default_speech_model: None,
        }
    }

    #[tokio::test]
    async fn explicit_unknown_model_is_rejected() {
        let router = Router::new();
        let descriptors = descriptors_with_categories();
        let result = router.route(Some("does-not-exist"), &[], &descriptors, None).await;
        assert!(matches!(result, Err(GatewayError::UnknownModel(_))));
    }

    #[tokio::test]
    async fn explicit_known_model_bypasses_classification() {
        let router = Router::new();
        let descriptors = descriptors_with_categories();
        let plan = router.route(Some("coder"), &[], &descriptors, None).await.unwrap();
        assert_eq!(plan.target_model_id, "coder");
        assert!(plan.category.is_none());
    }

    #[tokio::test]
    async fn vision_structural_override_skips_classifier_entirely() {
        let router = Router::new();
        let descriptors = descriptors_with_categories();
        let messages = vec![json!({
            "role": "user",
            "content": [
                {"type": "text", "text": "what is this?"},
                {"type": "image_url", "image_url": {"url": "data:..."}},
            ],
        })];
        // classifier_port is Some but unreachable - if it were consulted this
        // would error/time out; instead the vision override must fire first.
        let plan = router.route(Some("lols-smart"), &messages, &descriptors, Some(1)).await.unwrap();
        assert_eq!(plan.category.as_deref(), Some("vision"));
        assert_eq!(plan.target_model_id, "vision-model");
    }

    #[tokio::test]
    async fn empty_last_user_message_defaults_without_classifier() {
        let router = Router::new();
        let descriptors = descriptors_with_categories();
        let messages = vec![json!({"role": "user", "content": ""})];
        let plan = router.route(Some("lols-smart"), &messages, &descriptors, Some(1)).await.unwrap();
        assert_eq!(plan.category.as_deref(), Some("default"));
    }

    #[tokio::test]
    async fn missing_classifier_port_defaults_category() {
        let router = Router::new();
        let descriptors = descriptors_with_categories();
        let messages = vec![json!({"role": "user", "content": "hello there"})];
        let plan = router.route(Some("lols-smart"), &messages, &descriptors, None).await.unwrap();
        assert_eq!(plan.category.as_deref(), Some("default"));
        assert_eq!(plan.target_model_id, "general");
    }

    #[tokio::test]
    async fn test_pin_overrides_everything_else() {
        let router = Router::new();
        router.set_test_model(Some("pinned-model".into())).await;
        let descriptors = descriptors_with_categories();
        let plan = router.route(Some("coder"), &[], &descriptors, None).await.unwrap();
        assert_eq!(plan.target_model_id, "pinned-model");
        assert!(plan.category.is_none());
    }
}
