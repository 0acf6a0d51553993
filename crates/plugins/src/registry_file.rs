//! `plugins.json` — the on-disk record of installed plugins.

use std::path::PathBuf;

use parking_lot::Mutex;

use cerise_domain::config::{InstalledPlugin, PluginsRegistryFile};
use cerise_domain::error::{Error, Result};

/// Read-modify-write access to `plugins.json`, serialized by a lock.
pub struct PluginsJson {
    path: PathBuf,
    lock: Mutex<()>,
}

impl PluginsJson {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn list(&self) -> Result<Vec<InstalledPlugin>> {
        let _guard = self.lock.lock();
        Ok(self.read_file().plugins)
    }

    /// Insert or replace the entry with the same name.
    pub fn upsert(&self, plugin: InstalledPlugin) -> Result<()> {
        let _guard = self.lock.lock();
        let mut file = self.read_file();
        file.plugins.retain(|p| p.name != plugin.name);
        file.plugins.push(plugin);
        self.write_file(&file)
    }

    /// Remove an entry. Returns `false` when it was not recorded.
    pub fn remove(&self, name: &str) -> Result<bool> {
        let _guard = self.lock.lock();
        let mut file = self.read_file();
        let before = file.plugins.len();
        file.plugins.retain(|p| p.name != name);
        let removed = file.plugins.len() != before;
        if removed {
            self.write_file(&file)?;
        }
        Ok(removed)
    }

    pub fn set_enabled(&self, name: &str, enabled: bool) -> Result<bool> {
        let _guard = self.lock.lock();
        let mut file = self.read_file();
        let Some(entry) = file.plugins.iter_mut().find(|p| p.name == name) else {
            return Ok(false);
        };
        entry.enabled = enabled;
        self.write_file(&file)?;
        Ok(true)
    }

    fn read_file(&self) -> PluginsRegistryFile {
        match std::fs::read_to_string(&self.path) {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                tracing::warn!(path = %self.path.display(), error = %e, "corrupt plugins.json, starting empty");
                PluginsRegistryFile::default()
            }),
            Err(_) => PluginsRegistryFile::default(),
        }
    }

    fn write_file(&self, file: &PluginsRegistryFile) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(Error::Io)?;
        }
        let json = serde_json::to_string_pretty(file)?;
        std::fs::write(&self.path, json).map_err(Error::Io)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plugin(name: &str) -> InstalledPlugin {
        InstalledPlugin {
            name: name.into(),
            version: "0.1.0".into(),
            source: "upload".into(),
            source_url: String::new(),
            enabled: true,
            installed_at: "2025-01-01T00:00:00Z".into(),
        }
    }

    #[test]
    fn upsert_replaces_same_name() {
        let tmp = tempfile::tempdir().unwrap();
        let registry = PluginsJson::new(tmp.path().join("plugins.json"));
        registry.upsert(plugin("a")).unwrap();
        let mut updated = plugin("a");
        updated.version = "0.2.0".into();
        registry.upsert(updated).unwrap();
        let plugins = registry.list().unwrap();
        assert_eq!(plugins.len(), 1);
        assert_eq!(plugins[0].version, "0.2.0");
    }

    #[test]
    fn remove_and_toggle() {
        let tmp = tempfile::tempdir().unwrap();
        let registry = PluginsJson::new(tmp.path().join("plugins.json"));
        registry.upsert(plugin("a")).unwrap();
        assert!(registry.set_enabled("a", false).unwrap());
        assert!(!registry.list().unwrap()[0].enabled);
        assert!(registry.remove("a").unwrap());
        assert!(!registry.remove("a").unwrap());
    }
}
