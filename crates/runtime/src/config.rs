//! Configuration loading: `config.yaml` / `providers.yaml` under the data
//! directory, environment overrides, and default path resolution.

use std::path::{Path, PathBuf};

use cerise_domain::config::{env_vars, AppConfig, ProvidersConfig};
use cerise_domain::error::{Error, Result};

/// Resolve the data directory: `CERISE_DATA_DIR` or `./data`.
pub fn data_dir() -> PathBuf {
    std::env::var(env_vars::DATA_DIR)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("data"))
}

/// Load `config.yaml`, apply `CERISE_*` server overrides, and fill default
/// storage paths. A missing file yields defaults.
pub fn load_app_config(data_dir: &Path) -> Result<AppConfig> {
    let path = data_dir.join("config.yaml");
    let mut config: AppConfig = match std::fs::read_to_string(&path) {
        Ok(raw) => serde_yaml::from_str(&raw)
            .map_err(|e| Error::Config(format!("invalid {}: {e}", path.display())))?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => AppConfig::default(),
        Err(e) => return Err(Error::Io(e)),
    };

    if let Ok(host) = std::env::var(env_vars::SERVER_HOST) {
        config.server.host = host;
    }
    if let Ok(port) = std::env::var(env_vars::SERVER_PORT) {
        match port.parse() {
            Ok(port) => config.server.port = port,
            Err(_) => tracing::warn!(port, "invalid CERISE_SERVER_PORT, keeping config value"),
        }
    }
    if let Ok(debug) = std::env::var(env_vars::SERVER_DEBUG) {
        config.server.debug = matches!(debug.as_str(), "1" | "true" | "yes");
    }

    apply_path_defaults(&mut config, data_dir);
    Ok(config)
}

/// Load `providers.yaml` with `${VAR}` expansion from the environment.
pub fn load_providers_config(data_dir: &Path) -> Result<ProvidersConfig> {
    let path = data_dir.join("providers.yaml");
    let mut config: ProvidersConfig = match std::fs::read_to_string(&path) {
        Ok(raw) => serde_yaml::from_str(&raw)
            .map_err(|e| Error::Config(format!("invalid {}: {e}", path.display())))?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => ProvidersConfig::default(),
        Err(e) => return Err(Error::Io(e)),
    };
    config.expand_env(|var| std::env::var(var).ok());
    Ok(config)
}

/// Fill in the on-disk layout for everything the config leaves blank:
/// `memory/{memory.db, l1_core.db, l2_semantic.db, l4_procedural.db,
/// state.json}`, `proactive/state.json`, and `plugins/`.
fn apply_path_defaults(config: &mut AppConfig, data_dir: &Path) {
    let memory_dir = data_dir.join("memory");
    let store = &mut config.memory.store;
    if store.sqlite_path.is_empty() {
        store.sqlite_path = memory_dir.join("memory.db").display().to_string();
    }
    if store.state_path.is_empty() {
        store.state_path = memory_dir.join("state.json").display().to_string();
    }
    for (layer, file) in [
        (&mut config.memory.l1_core, "l1_core"),
        (&mut config.memory.l2_semantic, "l2_semantic"),
        (&mut config.memory.l4_procedural, "l4_procedural"),
    ] {
        if layer.sqlite_path.is_empty() {
            layer.sqlite_path = memory_dir.join(format!("{file}.db")).display().to_string();
        }
        if layer.state_path.is_empty() {
            layer.state_path = memory_dir.join(format!("{file}.json")).display().to_string();
        }
    }
    if config.proactive.state_path.is_empty() {
        config.proactive.state_path = data_dir
            .join("proactive")
            .join("state.json")
            .display()
            .to_string();
    }
    if config.plugins.plugins_dir.is_empty() {
        config.plugins.plugins_dir = data_dir.join("plugins").display().to_string();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_storage_paths() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_app_config(dir.path()).unwrap();
        assert!(config.memory.store.sqlite_path.ends_with("memory/memory.db"));
        assert!(config.memory.l1_core.sqlite_path.ends_with("memory/l1_core.db"));
        assert!(config
            .memory
            .l4_procedural
            .sqlite_path
            .ends_with("memory/l4_procedural.db"));
        assert!(config.proactive.state_path.ends_with("proactive/state.json"));
        assert!(config.plugins.plugins_dir.ends_with("plugins"));
    }

    #[test]
    fn yaml_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("config.yaml"),
            "server:\n  port: 9000\nmemory:\n  store:\n    backend: memory\n",
        )
        .unwrap();
        let config = load_app_config(dir.path()).unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.memory.store.backend, "memory");
    }
}
