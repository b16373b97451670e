//! Immutable configuration data model (§3) and JSON loading.
//!
//! Every [`ModelDescriptor`] in a [`GatewayDescriptors`] set is loaded once at
//! startup and is read-only thereafter, exactly like the teacher's
//! `slab-server::config::Config` being built once from the environment.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::types::GatewayError;

/// The virtual model name that triggers classifier-based routing.
pub const CLASSIFIER_ALIAS: &str = "lols-smart";

/// Fallback category used whenever classification can't decide.
pub const DEFAULT_CATEGORY: &str = "default";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    LocalText,
    LocalSpeech,
    RemoteHttp,
}

/// Flash-attention / batching / KV-cache knobs passed to a local text backend
/// at spawn time (§3, §4.1).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PerformanceBundle {
    #[serde(default)]
    pub flash_attention: Option<bool>,
    #[serde(default)]
    pub batch_size: Option<u32>,
    #[serde(default)]
    pub ubatch_size: Option<u32>,
    #[serde(default)]
    pub threads: Option<u32>,
    #[serde(default)]
    pub parallel_slots: Option<u32>,
    #[serde(default)]
    pub continuous_batching: Option<bool>,
    #[serde(default)]
    pub cache_type_k: Option<String>,
    #[serde(default)]
    pub cache_type_v: Option<String>,
}

/// A single immutable backend configuration entry (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelDescriptor {
    pub id: String,
    pub kind: BackendKind,

    /// Local kinds only; unique per local descriptor.
    #[serde(default)]
    pub port: Option<u16>,

    // ── local_text ──────────────────────────────────────────────────────
    #[serde(default)]
    pub repo: Option<String>,
    #[serde(default)]
    pub file: Option<String>,
    #[serde(default)]
    pub mmproj: Option<String>,
    #[serde(default)]
    pub context: Option<u32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub timeout: Option<u64>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub top_p: Option<f32>,
    #[serde(default)]
    pub performance: Option<PerformanceBundle>,

    // ── local_speech ────────────────────────────────────────────────────
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub threads: Option<u32>,

    // ── remote_http ─────────────────────────────────────────────────────
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub headers: Option<HashMap<String, String>>,

    // ── shared ──────────────────────────────────────────────────────────
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub system_prompt_path: Option<String>,

    /// Whether to place all layers on the configured GPU device, or run
    /// CPU-only. Applies to `local_text`/`local_speech` only.
    #[serde(default = "default_true")]
    pub gpu: bool,
}

fn default_true() -> bool {
    true
}

impl ModelDescriptor {
    /// Resolve the descriptor's system prompt, preferring `system_prompt_path`
    /// (file content) over the inline `system_prompt`.
    pub fn resolve_system_prompt(&self) -> Result<Option<String>, GatewayError> {
        resolve_prompt(self.system_prompt_path.as_deref(), self.system_prompt.as_deref())
    }

    pub fn forwarded_max_tokens(&self) -> u32 {
        self.max_tokens.unwrap_or(2000)
    }

    pub fn timeout_seconds(&self) -> u64 {
        self.timeout.unwrap_or(30)
    }

    /// Resolve `${NAME}` placeholders in `endpoint`/`api_key` against the
    /// process environment. Unresolved placeholders are left literal.
    pub fn resolved_endpoint(&self) -> Option<String> {
        self.endpoint.as_deref().map(expand_env)
    }

    pub fn resolved_api_key(&self) -> Option<String> {
        self.api_key.as_deref().map(expand_env)
    }
}

/// Per-classifier-category target: either a bare model id, or a record with
/// an optional category-level system prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CategoryBinding {
    Simple(String),
    Detailed {
        #[serde(rename = "modelId")]
        model_id: String,
        #[serde(default)]
        system_prompt: Option<String>,
        #[serde(default)]
        system_prompt_path: Option<String>,
    },
}

impl CategoryBinding {
    pub fn model_id(&self) -> &str {
        match self {
            CategoryBinding::Simple(id) => id,
            CategoryBinding::Detailed { model_id, .. } => model_id,
        }
    }

    pub fn resolve_system_prompt(&self) -> Result<Option<String>, GatewayError> {
        match self {
            CategoryBinding::Simple(_) => Ok(None),
            CategoryBinding::Detailed {
                system_prompt_path,
                system_prompt,
                ..
            } => resolve_prompt(system_prompt_path.as_deref(), system_prompt.as_deref()),
        }
    }
}

/// Configuration for the permanently-resident classifier backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    #[serde(rename = "modelId")]
    pub model_id: String,
    pub port: u16,
    #[serde(default)]
    pub context: Option<u32>,
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub system_prompt_path: Option<String>,
}

impl RouterConfig {
    /// Materialize the classifier's system prompt with `{CATEGORIES}`
    /// substituted by the comma-separated category keys.
    pub fn materialize_prompt(&self, categories: &[String]) -> Result<String, GatewayError> {
        let template = resolve_prompt(self.system_prompt_path.as_deref(), self.system_prompt.as_deref())?
            .unwrap_or_default();
        Ok(template.replace("{CATEGORIES}", &categories.join(", ")))
    }
}

/// The complete, process-wide set of configuration loaded at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayDescriptors {
    pub models: Vec<ModelDescriptor>,
    pub categories: HashMap<String, CategoryBinding>,
    pub router: Option<RouterConfig>,
    /// Process-wide policy flag: when true, a client-provided leading
    /// `system` message is stripped rather than honored (§4.7 step 6).
    #[serde(default)]
    pub ignore_role_system: bool,
    /// Default speech model id used when a transcription request omits one.
    #[serde(default)]
    pub default_speech_model: Option<String>,
}

/// On-disk shape before the two legacy map keys are normalized away.
///
/// The source tolerates `models` and `llama-models` as synonyms for the same
/// concept (Open Question, §9); `models` is canonical and wins when both are
/// present.
#[derive(Debug, Deserialize)]
struct RawGatewayDescriptors {
    #[serde(default)]
    models: Option<Vec<ModelDescriptor>>,
    #[serde(rename = "llama-models", default)]
    llama_models: Option<Vec<ModelDescriptor>>,
    #[serde(default)]
    categories: HashMap<String, CategoryBinding>,
    #[serde(default)]
    router: Option<RouterConfig>,
    #[serde(default)]
    ignore_role_system: bool,
    #[serde(default)]
    default_speech_model: Option<String>,
}

impl GatewayDescriptors {
    /// Load and validate the descriptor set from a JSON file on disk.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, GatewayError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| GatewayError::ConfigInvalid(format!("reading {}: {e}", path.display())))?;
        Self::parse(&text)
    }

    fn parse(text: &str) -> Result<Self, GatewayError> {
        let raw: RawGatewayDescriptors = serde_json::from_str(text)
            .map_err(|e| GatewayError::ConfigInvalid(format!("parsing descriptor file: {e}")))?;

        let models = match (raw.models, raw.llama_models) {
            (Some(canonical), Some(_legacy)) => {
                tracing::warn!(
                    "both 'models' and legacy 'llama-models' keys present; 'models' wins"
                );
                canonical
            }
            (Some(canonical), None) => canonical,
            (None, Some(legacy)) => legacy,
            (None, None) => Vec::new(),
        };

        let mut ports_seen = std::collections::HashSet::new();
        for m in &models {
            if matches!(m.kind, BackendKind::LocalText | BackendKind::LocalSpeech) {
                let port = m.port.ok_or_else(|| {
                    GatewayError::ConfigInvalid(format!("model '{}' is local but has no port", m.id))
                })?;
                if !ports_seen.insert(port) {
                    return Err(GatewayError::ConfigInvalid(format!(
                        "duplicate local port {port} across descriptors"
                    )));
                }
            }
        }

        Ok(GatewayDescriptors {
            models,
            categories: raw.categories,
            router: raw.router,
            ignore_role_system: raw.ignore_role_system,
            default_speech_model: raw.default_speech_model,
        })
    }

    pub fn find(&self, id: &str) -> Option<&ModelDescriptor> {
        self.models.iter().find(|m| m.id == id)
    }

    /// All categories defined in the binding map, in insertion order isn't
    /// guaranteed by `HashMap`; callers that need the `{CATEGORIES}` list
    /// should sort for determinism.
    pub fn category_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.categories.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn binding_for(&self, category: &str) -> Option<&CategoryBinding> {
        self.categories
            .get(category)
            .or_else(|| self.categories.get(DEFAULT_CATEGORY))
    }

    pub fn local_ports(&self) -> Vec<u16> {
        self.models.iter().filter_map(|m| m.port).collect()
    }
}

/// Resolve `systemPromptPath` (file content) over `systemPrompt` (inline).
fn resolve_prompt(path: Option<&str>, inline: Option<&str>) -> Result<Option<String>, GatewayError> {
    if let Some(p) = path {
        let expanded = expand_home(&expand_env(p));
        let content = std::fs::read_to_string(&expanded)
            .map_err(|e| GatewayError::ConfigInvalid(format!("reading prompt file {expanded}: {e}")))?;
        return Ok(Some(content));
    }
    Ok(inline.map(str::to_owned))
}

/// Substitute `${NAME}` patterns against process environment variables.
/// Unresolved placeholders are left literal.
pub fn expand_env(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(start) = rest.find("${") {
        let (head, tail) = rest.split_at(start);
        out.push_str(head);
        let after_brace = &tail[2..];
        match after_brace.find('}') {
            Some(end) => {
                let name = &after_brace[..end];
                match std::env::var(name) {
                    Ok(val) => out.push_str(&val),
                    Err(_) => out.push_str(&tail[..2 + end + 1]),
                }
                rest = &after_brace[end + 1..];
            }
            None => {
                out.push_str(tail);
                rest = "";
                break;
            }
        }
    }
    out.push_str(rest);
    out
}

/// Expand a leading `~/` against the user's home directory.
pub fn expand_home(input: &str) -> String {
    if let Some(rest) = input.strip_prefix("~/") {
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home).join(rest).to_string_lossy().into_owned();
        }
    }
    input.to_owned()
}
