//! Persistent state management: an in-memory JSON document with dot-path
//! access, optionally flushed to a single file on every mutation.
//!
//! All operations are serialized by one async lock. A corrupt file on load
//! falls back to empty state with a warning rather than failing startup.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::{Map, Value};
use tokio::sync::Mutex;

use cerise_domain::error::{Error, Result};

struct Inner {
    state: Map<String, Value>,
    dirty: bool,
}

/// State storage with optional JSON-file persistence.
#[derive(Clone)]
pub struct StateStore {
    inner: Arc<Mutex<Inner>>,
    storage_path: Option<PathBuf>,
}

impl StateStore {
    /// In-memory only store.
    pub fn in_memory() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner { state: Map::new(), dirty: false })),
            storage_path: None,
        }
    }

    /// Store persisted at `path`. An existing file is loaded; unreadable or
    /// corrupt contents are replaced by empty state with a warning.
    pub fn new(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let state = match std::fs::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str::<Map<String, Value>>(&raw) {
                Ok(state) => {
                    tracing::info!(path = %path.display(), "loaded state");
                    state
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "corrupt state file, starting empty");
                    Map::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Map::new(),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "failed to read state file, starting empty");
                Map::new()
            }
        };
        Self {
            inner: Arc::new(Mutex::new(Inner { state, dirty: false })),
            storage_path: Some(path),
        }
    }

    /// Get a value by dot-path key.
    pub async fn get(&self, key: &str) -> Option<Value> {
        let inner = self.inner.lock().await;
        get_nested(&inner.state, key).cloned()
    }

    /// Set a value by dot-path key, creating intermediate objects.
    pub async fn set(&self, key: &str, value: Value) -> Result<()> {
        let mut inner = self.inner.lock().await;
        set_nested(&mut inner.state, key, value);
        inner.dirty = true;
        self.save(&mut inner)
    }

    /// Delete a key. Returns `false` when the key did not exist.
    pub async fn delete(&self, key: &str) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        let removed = delete_nested(&mut inner.state, key);
        if removed {
            inner.dirty = true;
            self.save(&mut inner)?;
        }
        Ok(removed)
    }

    pub async fn exists(&self, key: &str) -> bool {
        self.get(key).await.is_some()
    }

    /// Top-level keys, optionally filtered by prefix.
    pub async fn keys(&self, prefix: &str) -> Vec<String> {
        let inner = self.inner.lock().await;
        inner
            .state
            .keys()
            .filter(|k| prefix.is_empty() || k.starts_with(prefix))
            .cloned()
            .collect()
    }

    pub async fn all(&self) -> Map<String, Value> {
        self.inner.lock().await.state.clone()
    }

    /// Set several dot-path keys under one lock acquisition and flush once.
    pub async fn update(&self, entries: Vec<(String, Value)>) -> Result<()> {
        let mut inner = self.inner.lock().await;
        for (key, value) in entries {
            set_nested(&mut inner.state, &key, value);
        }
        inner.dirty = true;
        self.save(&mut inner)
    }

    pub async fn clear(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.state = Map::new();
        inner.dirty = true;
        self.save(&mut inner)
    }

    /// A view that transparently prefixes every key with `namespace.`.
    pub fn namespace(&self, namespace: impl Into<String>) -> NamespacedStore {
        NamespacedStore {
            store: self.clone(),
            namespace: namespace.into(),
        }
    }

    fn save(&self, inner: &mut Inner) -> Result<()> {
        let Some(path) = &self.storage_path else {
            inner.dirty = false;
            return Ok(());
        };
        if !inner.dirty {
            return Ok(());
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(Error::Io)?;
        }
        let json = serde_json::to_string_pretty(&inner.state)?;
        std::fs::write(path, json).map_err(Error::Io)?;
        inner.dirty = false;
        tracing::debug!(path = %path.display(), "saved state");
        Ok(())
    }
}

/// State store scoped to a namespace prefix.
#[derive(Clone)]
pub struct NamespacedStore {
    store: StateStore,
    namespace: String,
}

impl NamespacedStore {
    fn prefixed(&self, key: &str) -> String {
        format!("{}.{key}", self.namespace)
    }

    pub async fn get(&self, key: &str) -> Option<Value> {
        self.store.get(&self.prefixed(key)).await
    }

    pub async fn set(&self, key: &str, value: Value) -> Result<()> {
        self.store.set(&self.prefixed(key), value).await
    }

    pub async fn delete(&self, key: &str) -> Result<bool> {
        self.store.delete(&self.prefixed(key)).await
    }

    pub async fn exists(&self, key: &str) -> bool {
        self.store.exists(&self.prefixed(key)).await
    }
}

fn get_nested<'a>(state: &'a Map<String, Value>, key: &str) -> Option<&'a Value> {
    let mut parts = key.split('.');
    let first = parts.next()?;
    let mut current = state.get(first)?;
    for part in parts {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}

fn set_nested(state: &mut Map<String, Value>, key: &str, value: Value) {
    let parts: Vec<&str> = key.split('.').collect();
    let mut current = state;
    for part in &parts[..parts.len() - 1] {
        let entry = current
            .entry(part.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        let Value::Object(map) = entry else { return };
        current = map;
    }
    current.insert(parts[parts.len() - 1].to_string(), value);
}

fn delete_nested(state: &mut Map<String, Value>, key: &str) -> bool {
    let parts: Vec<&str> = key.split('.').collect();
    let mut current = state;
    for part in &parts[..parts.len() - 1] {
        match current.get_mut(*part).and_then(Value::as_object_mut) {
            Some(next) => current = next,
            None => return false,
        }
    }
    current.remove(parts[parts.len() - 1]).is_some()
}
