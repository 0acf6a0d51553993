//! Skill and tool-run storage backed by the state store.

use serde_json::Value;

use cerise_domain::error::Result;
use cerise_state::{NamespacedStore, StateStore};

use crate::models::{Skill, ToolRun};

/// Skills registry persisted under the `skills` namespace.
pub struct SkillStore {
    store: NamespacedStore,
}

impl SkillStore {
    pub fn new(store: &StateStore) -> Self {
        Self {
            store: store.namespace("skills"),
        }
    }

    pub async fn list_skills(&self) -> Vec<Skill> {
        self.store
            .get("registry")
            .await
            .and_then(|v| v.as_object().cloned())
            .map(|registry| {
                registry
                    .values()
                    .filter_map(|entry| serde_json::from_value(entry.clone()).ok())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub async fn get_skill(&self, skill_id: &str) -> Option<Skill> {
        let registry = self.store.get("registry").await?;
        serde_json::from_value(registry.get(skill_id)?.clone()).ok()
    }

    pub async fn upsert_skill(&self, skill: &Skill) -> Result<()> {
        let mut registry = self
            .store
            .get("registry")
            .await
            .and_then(|v| v.as_object().cloned())
            .unwrap_or_default();
        registry.insert(skill.id.clone(), serde_json::to_value(skill)?);
        self.store.set("registry", Value::Object(registry)).await
    }

    pub async fn delete_skill(&self, skill_id: &str) -> Result<bool> {
        let mut registry = self
            .store
            .get("registry")
            .await
            .and_then(|v| v.as_object().cloned())
            .unwrap_or_default();
        if registry.remove(skill_id).is_none() {
            return Ok(false);
        }
        self.store.set("registry", Value::Object(registry)).await?;
        Ok(true)
    }
}

/// Per-session ring buffer of tool runs.
pub struct ToolRunStore {
    store: NamespacedStore,
    keep_last: usize,
}

impl ToolRunStore {
    pub fn new(store: &StateStore, keep_last: usize) -> Self {
        Self {
            store: store.namespace("skills"),
            keep_last,
        }
    }

    pub async fn append(&self, session_id: &str, run: &ToolRun) -> Result<()> {
        let key = format!("tool_runs.{session_id}");
        let mut runs = self
            .store
            .get(&key)
            .await
            .and_then(|v| v.as_array().cloned())
            .unwrap_or_default();
        runs.push(serde_json::to_value(run)?);
        if self.keep_last > 0 && runs.len() > self.keep_last {
            let excess = runs.len() - self.keep_last;
            runs.drain(..excess);
        }
        self.store.set(&key, Value::Array(runs)).await
    }

    pub async fn list(&self, session_id: &str, limit: Option<usize>) -> Vec<ToolRun> {
        let key = format!("tool_runs.{session_id}");
        let runs: Vec<ToolRun> = self
            .store
            .get(&key)
            .await
            .and_then(|v| v.as_array().cloned())
            .map(|entries| {
                entries
                    .into_iter()
                    .filter_map(|entry| serde_json::from_value(entry).ok())
                    .collect()
            })
            .unwrap_or_default();
        match limit {
            Some(limit) if limit > 0 && runs.len() > limit => {
                runs[runs.len() - limit..].to_vec()
            }
            _ => runs,
        }
    }

    pub async fn clear(&self, session_id: &str) -> Result<()> {
        let key = format!("tool_runs.{session_id}");
        self.store.set(&key, Value::Array(Vec::new())).await
    }
}
