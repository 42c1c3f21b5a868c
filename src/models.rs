//! Model descriptor registry.
//!
//! Descriptors are loaded once at startup from a YAML/JSON document and held
//! behind an `Arc<RwLock<Arc<Inner>>>` so that a future config-reload can
//! perform a copy-on-write replace while in-flight requests keep reading a
//! consistent snapshot.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::core::credentials;
use crate::core::error::ConfigError;

/// The closed set of supported vendor wire protocols.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProviderKind {
    OpenaiChat,
    AnthropicMessages,
    GoogleGenerate,
    CohereGenerate,
    ZhipuChat,
    BaiduErnie,
    MoonshotChat,
    MistralChat,
}

impl ProviderKind {
    /// All variants, used by the provider registry to assert full adapter coverage.
    pub const ALL: [ProviderKind; 8] = [
        ProviderKind::OpenaiChat,
        ProviderKind::AnthropicMessages,
        ProviderKind::GoogleGenerate,
        ProviderKind::CohereGenerate,
        ProviderKind::ZhipuChat,
        ProviderKind::BaiduErnie,
        ProviderKind::MoonshotChat,
        ProviderKind::MistralChat,
    ];
}

/// Immutable configuration entry for one model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelDescriptor {
    /// Unique id used in `selected_model_ids` and as the cache/analytics key.
    pub id: String,
    /// Vendor wire protocol this model speaks.
    pub provider_kind: ProviderKind,
    /// Base URL for the provider's API.
    pub endpoint_url: String,
    /// Vendor-side model name sent in the request body.
    pub model_name: String,
    /// Name of the environment variable holding this model's credential.
    pub credential_ref: String,
    /// Secondary credential env var, used only by `baidu-ernie`'s OAuth exchange.
    #[serde(default)]
    pub credential_secret_ref: Option<String>,
    /// Upper bound on completion tokens requested from the provider.
    pub max_tokens: u32,
    /// Temperature applied when the request does not override it.
    pub default_temperature: f32,
    /// Whether this model may be selected. Forced to `false` at load time if
    /// its credential does not resolve to a non-empty secret.
    pub enabled: bool,
    /// Used for `QueryAnalyticsRecord::cost_estimate`.
    pub cost_per_1k_tokens: f64,
    /// Human-readable name returned in `/models`.
    pub display_name: String,
    /// Optional tags used for specialty-aware model selection.
    #[serde(default)]
    pub specialties: HashSet<String>,
}

/// On-disk shape of the model-descriptor file.
#[derive(Debug, Deserialize)]
struct DescriptorFile {
    models: HashMap<String, DescriptorEntry>,
    default_models: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct DescriptorEntry {
    provider_kind: ProviderKind,
    model_name: String,
    endpoint: String,
    credential_ref: String,
    #[serde(default)]
    credential_secret_ref: Option<String>,
    max_tokens: u32,
    #[serde(default = "default_temperature")]
    temperature: f32,
    #[serde(default = "default_true")]
    enabled: bool,
    #[serde(default)]
    cost_per_1k_tokens: f64,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    specialties: HashSet<String>,
}

fn default_temperature() -> f32 {
    0.7
}

fn default_true() -> bool {
    true
}

struct Inner {
    by_id: HashMap<String, ModelDescriptor>,
    default_models: Vec<String>,
}

/// Read-mostly table of model descriptors, swappable via `reload`.
pub struct ModelRegistry {
    inner: RwLock<Arc<Inner>>,
}

impl ModelRegistry {
    /// Parse and validate a descriptor file's contents (YAML or JSON — both
    /// parse as YAML since YAML 1.2 is a JSON superset).
    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        let file: DescriptorFile = serde_yaml::from_str(contents).map_err(|e| ConfigError::DescriptorLoad {
            path: "<provided contents>".to_string(),
            message: e.to_string(),
        })?;

        let mut by_id = HashMap::with_capacity(file.models.len());
        for (id, entry) in file.models {
            if by_id.contains_key(&id) {
                return Err(ConfigError::DuplicateModelId(id));
            }

            let credential_present = credentials::resolve(&entry.credential_ref).is_some();
            let enabled = entry.enabled && credential_present;

            let descriptor = ModelDescriptor {
                display_name: entry.display_name.unwrap_or_else(|| id.clone()),
                id: id.clone(),
                provider_kind: entry.provider_kind,
                endpoint_url: entry.endpoint,
                model_name: entry.model_name,
                credential_ref: entry.credential_ref,
                credential_secret_ref: entry.credential_secret_ref,
                max_tokens: entry.max_tokens,
                default_temperature: entry.temperature,
                enabled,
                cost_per_1k_tokens: entry.cost_per_1k_tokens,
                specialties: entry.specialties,
            };
            by_id.insert(id, descriptor);
        }

        for default_id in &file.default_models {
            if !by_id.contains_key(default_id) {
                return Err(ConfigError::UnknownDefaultModel(default_id.clone()));
            }
        }

        Ok(Self {
            inner: RwLock::new(Arc::new(Inner {
                by_id,
                default_models: file.default_models,
            })),
        })
    }

    /// Load from a file path on disk.
    pub async fn load(path: &std::path::Path) -> Result<Self, ConfigError> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| ConfigError::DescriptorLoad {
                path: path.display().to_string(),
                message: e.to_string(),
            })?;
        Self::parse(&contents).map_err(|e| match e {
            ConfigError::DescriptorLoad { message, .. } => ConfigError::DescriptorLoad {
                path: path.display().to_string(),
                message,
            },
            other => other,
        })
    }

    /// Atomically replace the table (copy-on-write config reload).
    pub async fn reload(&self, contents: &str) -> Result<(), ConfigError> {
        let fresh = Self::parse(contents)?;
        let new_inner = fresh.inner.into_inner();
        *self.inner.write().await = new_inner;
        Ok(())
    }

    /// Fetch one descriptor by id.
    pub async fn get(&self, id: &str) -> Option<ModelDescriptor> {
        self.inner.read().await.by_id.get(id).cloned()
    }

    /// All enabled descriptors, in stable id order.
    pub async fn enabled(&self) -> Vec<ModelDescriptor> {
        let inner = self.inner.read().await;
        let mut list: Vec<ModelDescriptor> =
            inner.by_id.values().filter(|d| d.enabled).cloned().collect();
        list.sort_by(|a, b| a.id.cmp(&b.id));
        list
    }

    /// All descriptors regardless of `enabled`, for `/models`.
    pub async fn all(&self) -> Vec<ModelDescriptor> {
        let inner = self.inner.read().await;
        let mut list: Vec<ModelDescriptor> = inner.by_id.values().cloned().collect();
        list.sort_by(|a, b| a.id.cmp(&b.id));
        list
    }

    /// The configured default model id set, filtered to currently-enabled ones.
    pub async fn default_model_ids(&self) -> Vec<String> {
        let inner = self.inner.read().await;
        inner
            .default_models
            .iter()
            .filter(|id| inner.by_id.get(*id).map(|d| d.enabled).unwrap_or(false))
            .cloned()
            .collect()
    }

    /// Validate that `ids` are all known and enabled; returns the unknown/disabled ones.
    pub async fn validate_selection(&self, ids: &[String]) -> Vec<String> {
        let inner = self.inner.read().await;
        ids.iter()
            .filter(|id| !inner.by_id.get(id.as_str()).map(|d| d.enabled).unwrap_or(false))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const DOC: &str = r#"
models:
  m1:
    provider_kind: openai-chat
    model_name: gpt-4o
    endpoint: https://api.openai.com/v1/chat/completions
    credential_ref: TEST_OPENAI_KEY
    max_tokens: 1024
  m2:
    provider_kind: anthropic-messages
    model_name: claude-3-5-sonnet
    endpoint: https://api.anthropic.com/v1/messages
    credential_ref: TEST_ANTHROPIC_KEY_MISSING
    max_tokens: 1024
default_models: [m1, m2]
"#;

    #[tokio::test]
    #[serial]
    async fn disables_models_with_missing_credentials() {
        std::env::set_var("TEST_OPENAI_KEY", "sk-test");
        std::env::remove_var("TEST_ANTHROPIC_KEY_MISSING");

        let registry = ModelRegistry::parse(DOC).unwrap();
        let m1 = registry.get("m1").await.unwrap();
        let m2 = registry.get("m2").await.unwrap();
        assert!(m1.enabled);
        assert!(!m2.enabled);

        let defaults = registry.default_model_ids().await;
        assert_eq!(defaults, vec!["m1".to_string()]);

        std::env::remove_var("TEST_OPENAI_KEY");
    }

    #[test]
    fn rejects_unknown_default_model() {
        let doc = r#"
models:
  m1:
    provider_kind: openai-chat
    model_name: gpt-4o
    endpoint: https://api.openai.com/v1/chat/completions
    credential_ref: TEST_X
    max_tokens: 1024
default_models: [missing]
"#;
        assert!(matches!(
            ModelRegistry::parse(doc),
            Err(ConfigError::UnknownDefaultModel(_))
        ));
    }
}
