//! Plugin manifest and registry file schemas.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::default_true;

/// `manifest.json` at the root of every plugin directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginManifest {
    pub name: String,
    pub version: String,
    /// Entry file of the plugin, relative to the plugin directory.
    pub entry_point: String,
    /// Exported class/handler name inside the entry point.
    pub class_name: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub runtime: Option<PluginRuntime>,
    /// Defaults for the plugin's own configuration (`properties.*.default`).
    #[serde(default)]
    pub config_schema: Option<serde_json::Value>,
    /// Package dependencies (`name -> version spec`) for the install job.
    #[serde(default)]
    pub dependencies: Option<HashMap<String, String>>,
}

impl PluginManifest {
    /// Check the manifest carries the required fields with non-empty values.
    pub fn validate(&self) -> Result<(), String> {
        for (field, value) in [
            ("name", &self.name),
            ("version", &self.version),
            ("entry_point", &self.entry_point),
            ("class_name", &self.class_name),
        ] {
            if value.trim().is_empty() {
                return Err(format!("manifest missing required field: {field}"));
            }
        }
        Ok(())
    }

    /// Merge `config_schema` defaults with user-supplied config.
    /// User values win; unknown user keys pass through.
    pub fn merged_config(&self, user: Option<&serde_json::Value>) -> serde_json::Map<String, serde_json::Value> {
        let mut merged = serde_json::Map::new();
        if let Some(properties) = self
            .config_schema
            .as_ref()
            .and_then(|s| s.get("properties"))
            .and_then(|p| p.as_object())
        {
            for (key, prop) in properties {
                if let Some(user_value) = user.and_then(|u| u.get(key)) {
                    merged.insert(key.clone(), user_value.clone());
                } else if let Some(default) = prop.get("default") {
                    merged.insert(key.clone(), default.clone());
                }
            }
        }
        if let Some(user_map) = user.and_then(|u| u.as_object()) {
            for (key, value) in user_map {
                merged.entry(key.clone()).or_insert_with(|| value.clone());
            }
        }
        merged
    }
}

/// Out-of-process runtime declaration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginRuntime {
    /// `python` | `node` | `go`.
    pub language: String,
    /// Command entry overriding `entry_point` (e.g. a built binary).
    #[serde(default)]
    pub entry: Option<String>,
    /// Only `stdio` is supported.
    #[serde(default = "default_transport")]
    pub transport: String,
}

fn default_transport() -> String {
    "stdio".into()
}

/// One installed plugin recorded in `plugins.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstalledPlugin {
    pub name: String,
    pub version: String,
    /// `github` | `zip` | `upload`.
    pub source: String,
    #[serde(default)]
    pub source_url: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub installed_at: String,
}

/// Contents of `plugins.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PluginsRegistryFile {
    #[serde(default)]
    pub plugins: Vec<InstalledPlugin>,
}

/// Runtime-level plugin settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Directory scanned for plugin subdirectories.
    #[serde(default)]
    pub plugins_dir: String,
    /// Per-plugin user configuration keyed by plugin name.
    #[serde(default)]
    pub config: HashMap<String, serde_json::Value>,
    /// Name of the venv directory created for Python plugins.
    #[serde(default = "default_venv_dir")]
    pub python_venv_dir: String,
}

impl Default for PluginsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            plugins_dir: String::new(),
            config: HashMap::new(),
            python_venv_dir: default_venv_dir(),
        }
    }
}

fn default_venv_dir() -> String {
    ".venv".into()
}
