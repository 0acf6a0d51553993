//! Provider registry configuration (`providers.yaml`).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::default_true;

/// One configured provider instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Registry id this instance is cached under.
    pub id: String,
    /// Provider type resolved against registered builders.
    #[serde(rename = "type")]
    pub provider_type: String,
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Builder-specific settings (`api_key`, `base_url`, `model`, ...).
    /// String values of the form `${VAR}` are expanded from the environment
    /// at load time.
    #[serde(default)]
    pub config: HashMap<String, serde_json::Value>,
}

/// Contents of `providers.yaml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProvidersConfig {
    #[serde(default)]
    pub default: Option<String>,
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
}

impl ProvidersConfig {
    /// Expand `${VAR}` values in all provider configs using `lookup`.
    /// Unknown variables expand to the empty string with a warning.
    pub fn expand_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        for provider in &mut self.providers {
            for (key, value) in provider.config.iter_mut() {
                let Some(text) = value.as_str() else { continue };
                if let Some(var) = text.strip_prefix("${").and_then(|t| t.strip_suffix('}')) {
                    match lookup(var) {
                        Some(resolved) => *value = serde_json::Value::String(resolved),
                        None => {
                            tracing::warn!(
                                provider = %provider.id,
                                key = %key,
                                var = %var,
                                "environment variable not set, expanding to empty"
                            );
                            *value = serde_json::Value::String(String::new());
                        }
                    }
                }
            }
        }
    }
}
