//! Plugin manager: discovery, lifecycle, and ability ownership.
//!
//! Plugins run out-of-process: the manager spawns the plugin's declared
//! runtime as a stdio MCP server and registers its tools as abilities owned
//! by the plugin. Unloading closes the subprocess and unregisters every
//! ability the plugin owns. Loading and unloading are globally serialized.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::Mutex;

use cerise_abilities::AbilityRegistry;
use cerise_domain::config::{McpServerConfig, PluginManifest};
use cerise_domain::error::{Error, Result};
use cerise_mcp::McpStdioClient;

use crate::safety::validate_plugin_name;

/// Environment variable carrying the merged plugin configuration (JSON).
pub const PLUGIN_CONFIG_ENV: &str = "CERISE_PLUGIN_CONFIG";

/// A loaded plugin and its runtime state.
pub struct LoadedPlugin {
    pub name: String,
    pub manifest: PluginManifest,
    pub ability_names: Vec<String>,
    pub runtime_config: Option<Value>,
    client: Arc<McpStdioClient>,
}

/// Manages plugin discovery, loading, and lifecycle.
pub struct PluginManager {
    plugins_dir: PathBuf,
    registry: Arc<AbilityRegistry>,
    venv_dir_name: String,
    loaded: Mutex<HashMap<String, LoadedPlugin>>,
}

impl PluginManager {
    pub fn new(plugins_dir: impl Into<PathBuf>, registry: Arc<AbilityRegistry>) -> Self {
        Self {
            plugins_dir: plugins_dir.into(),
            registry,
            venv_dir_name: ".venv".into(),
            loaded: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_venv_dir(mut self, venv_dir_name: &str) -> Self {
        self.venv_dir_name = venv_dir_name.to_string();
        self
    }

    /// Subdirectories of the plugins dir containing a `manifest.json`.
    /// Entries starting with `_` are skipped.
    pub fn discover(&self) -> Vec<String> {
        let Ok(entries) = std::fs::read_dir(&self.plugins_dir) else {
            tracing::warn!(dir = %self.plugins_dir.display(), "plugins directory not found");
            return Vec::new();
        };
        let mut plugins: Vec<String> = entries
            .flatten()
            .filter(|entry| entry.path().is_dir())
            .filter_map(|entry| entry.file_name().into_string().ok())
            .filter(|name| !name.starts_with('_'))
            .filter(|name| self.plugins_dir.join(name).join("manifest.json").exists())
            .collect();
        plugins.sort();
        plugins
    }

    /// Load one plugin. On any failure the registry is left unchanged and
    /// the error is returned for logging by the caller.
    pub async fn load(&self, plugin_name: &str, config: Option<Value>) -> Result<bool> {
        let plugin_name = validate_plugin_name(plugin_name)?;
        let mut loaded = self.loaded.lock().await;
        if loaded.contains_key(&plugin_name) {
            tracing::warn!(plugin = %plugin_name, "plugin already loaded");
            return Ok(false);
        }

        let plugin_dir = self.plugins_dir.join(&plugin_name);
        let manifest = read_manifest(&plugin_dir)?;
        let merged_config = manifest.merged_config(config.as_ref());

        let server_config = self.build_server_config(&plugin_name, &plugin_dir, &manifest, &merged_config)?;
        let client = Arc::new(McpStdioClient::new(server_config));

        let tools = match client.list_tools().await {
            Ok(tools) => tools,
            Err(e) => {
                client.close().await;
                return Err(e);
            }
        };
        if tools.is_empty() {
            client.close().await;
            return Err(Error::FailedPrecondition(format!(
                "plugin '{plugin_name}' exposes no tools"
            )));
        }

        let mut ability_names = Vec::with_capacity(tools.len());
        for tool in tools {
            let ability_name = tool.name.clone();
            let display_name = manifest
                .display_name
                .clone()
                .map(|d| format!("{d}: {}", tool.name))
                .unwrap_or_else(|| tool.name.clone());
            self.registry.register_owned(
                Arc::new(cerise_mcp::manager::McpToolAbility::for_plugin(
                    ability_name.clone(),
                    display_name,
                    tool,
                    Arc::clone(&client),
                )),
                &plugin_name,
            );
            ability_names.push(ability_name);
        }

        tracing::info!(
            plugin = %plugin_name,
            version = %manifest.version,
            abilities = ability_names.len(),
            "loaded plugin"
        );
        loaded.insert(
            plugin_name.clone(),
            LoadedPlugin {
                name: plugin_name,
                manifest,
                ability_names,
                runtime_config: config,
                client,
            },
        );
        Ok(true)
    }

    /// Unload a plugin: close its subprocess and unregister its abilities.
    /// Returns `false` when it was not loaded.
    pub async fn unload(&self, plugin_name: &str) -> bool {
        let mut loaded = self.loaded.lock().await;
        let Some(plugin) = loaded.remove(plugin_name) else {
            tracing::warn!(plugin = %plugin_name, "plugin not loaded");
            return false;
        };
        plugin.client.close().await;
        let removed = self.registry.unregister_owned(&plugin.name);
        tracing::info!(plugin = %plugin_name, abilities = removed.len(), "unloaded plugin");
        true
    }

    /// Unload then load, preserving the runtime config.
    pub async fn reload(&self, plugin_name: &str) -> Result<bool> {
        let config = {
            let loaded = self.loaded.lock().await;
            loaded.get(plugin_name).and_then(|p| p.runtime_config.clone())
        };
        self.unload(plugin_name).await;
        self.load(plugin_name, config).await
    }

    /// Load every discovered plugin. Failures are logged per plugin.
    pub async fn load_all(&self, config_map: &HashMap<String, Value>) -> HashMap<String, bool> {
        let mut results = HashMap::new();
        for plugin_name in self.discover() {
            let config = config_map.get(&plugin_name).cloned();
            let ok = match self.load(&plugin_name, config).await {
                Ok(ok) => ok,
                Err(e) => {
                    tracing::error!(plugin = %plugin_name, error = %e, "failed to load plugin");
                    false
                }
            };
            results.insert(plugin_name, ok);
        }
        results
    }

    pub async fn unload_all(&self) {
        let names: Vec<String> = self.loaded.lock().await.keys().cloned().collect();
        for name in names {
            self.unload(&name).await;
        }
    }

    pub async fn loaded_plugins(&self) -> Vec<String> {
        self.loaded.lock().await.keys().cloned().collect()
    }

    pub async fn plugin_manifest(&self, plugin_name: &str) -> Option<PluginManifest> {
        self.loaded
            .lock()
            .await
            .get(plugin_name)
            .map(|p| p.manifest.clone())
    }

    /// Command line for the plugin's declared runtime.
    fn build_server_config(
        &self,
        plugin_name: &str,
        plugin_dir: &Path,
        manifest: &PluginManifest,
        merged_config: &serde_json::Map<String, Value>,
    ) -> Result<McpServerConfig> {
        let language = manifest
            .runtime
            .as_ref()
            .map(|r| r.language.to_lowercase())
            .unwrap_or_else(|| "python".into());
        let entry = manifest
            .runtime
            .as_ref()
            .and_then(|r| r.entry.clone())
            .unwrap_or_else(|| manifest.entry_point.clone());
        let entry_path = plugin_dir.join(&entry);

        let (command, args) = match language.as_str() {
            "python" => {
                let venv_python = plugin_dir
                    .join(&self.venv_dir_name)
                    .join(if cfg!(windows) { "Scripts/python.exe" } else { "bin/python" });
                let python = if venv_python.exists() {
                    venv_python.display().to_string()
                } else {
                    "python3".to_string()
                };
                (python, vec![entry_path.display().to_string()])
            }
            "node" | "nodejs" | "javascript" => {
                ("node".to_string(), vec![entry_path.display().to_string()])
            }
            "go" | "golang" => (entry_path.display().to_string(), Vec::new()),
            other => {
                return Err(Error::FailedPrecondition(format!(
                    "unsupported plugin runtime language: {other}"
                )))
            }
        };

        if let Some(runtime) = &manifest.runtime {
            if runtime.transport != "stdio" {
                return Err(Error::FailedPrecondition(format!(
                    "unsupported plugin transport: {}",
                    runtime.transport
                )));
            }
        }

        let mut config = McpServerConfig::new(format!("plugin:{plugin_name}"), command)
            .with_args(args);
        config.env.insert(
            PLUGIN_CONFIG_ENV.to_string(),
            serde_json::to_string(merged_config)?,
        );
        Ok(config)
    }
}

fn read_manifest(plugin_dir: &Path) -> Result<PluginManifest> {
    let manifest_path = plugin_dir.join("manifest.json");
    let raw = std::fs::read_to_string(&manifest_path).map_err(|e| {
        Error::NotFound(format!(
            "plugin manifest not found: {}: {e}",
            manifest_path.display()
        ))
    })?;
    let manifest: PluginManifest = serde_json::from_str(&raw)
        .map_err(|e| Error::InvalidArgument(format!("invalid manifest.json: {e}")))?;
    manifest.validate().map_err(Error::InvalidArgument)?;
    Ok(manifest)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_manifest(dir: &Path, name: &str) {
        std::fs::create_dir_all(dir).unwrap();
        std::fs::write(
            dir.join("manifest.json"),
            format!(
                r#"{{"name":"{name}","version":"0.1.0","entry_point":"plugin.py","class_name":"Plugin"}}"#
            ),
        )
        .unwrap();
    }

    #[tokio::test]
    async fn discover_skips_underscore_and_manifestless_dirs() {
        let tmp = tempfile::tempdir().unwrap();
        write_manifest(&tmp.path().join("alpha"), "alpha");
        write_manifest(&tmp.path().join("_template"), "_template");
        std::fs::create_dir_all(tmp.path().join("no-manifest")).unwrap();

        let manager = PluginManager::new(tmp.path(), Arc::new(AbilityRegistry::new()));
        assert_eq!(manager.discover(), vec!["alpha".to_string()]);
    }

    #[tokio::test]
    async fn unload_unknown_plugin_is_false() {
        let tmp = tempfile::tempdir().unwrap();
        let manager = PluginManager::new(tmp.path(), Arc::new(AbilityRegistry::new()));
        assert!(!manager.unload("ghost").await);
    }

    #[tokio::test]
    async fn load_rejects_bad_names() {
        let tmp = tempfile::tempdir().unwrap();
        let manager = PluginManager::new(tmp.path(), Arc::new(AbilityRegistry::new()));
        assert!(matches!(
            manager.load("../evil", None).await,
            Err(Error::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn load_missing_manifest_is_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        let manager = PluginManager::new(tmp.path(), Arc::new(AbilityRegistry::new()));
        assert!(matches!(
            manager.load("ghost", None).await,
            Err(Error::NotFound(_))
        ));
    }
}
