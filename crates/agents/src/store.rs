//! Agent storage backed by the state store (`agents` namespace).

use serde_json::Value;

use cerise_domain::error::Result;
use cerise_state::{NamespacedStore, StateStore};

use crate::models::{Agent, AgentMessage};

/// Message log and inbox cap.
const KEEP_LAST: usize = 200;

pub struct AgentStore {
    store: NamespacedStore,
}

impl AgentStore {
    pub fn new(store: &StateStore) -> Self {
        Self {
            store: store.namespace("agents"),
        }
    }

    pub async fn list_agents(&self) -> Vec<Agent> {
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

    pub async fn get_agent(&self, agent_id: &str) -> Option<Agent> {
        let registry = self.store.get("registry").await?;
        serde_json::from_value(registry.get(agent_id)?.clone()).ok()
    }

    pub async fn upsert_agent(&self, agent: &Agent) -> Result<()> {
        let mut registry = self
            .store
            .get("registry")
            .await
            .and_then(|v| v.as_object().cloned())
            .unwrap_or_default();
        registry.insert(agent.id.clone(), serde_json::to_value(agent)?);
        self.store.set("registry", Value::Object(registry)).await
    }

    pub async fn append_message(&self, agent_id: &str, message: &AgentMessage) -> Result<()> {
        self.push_capped(&format!("messages.{agent_id}"), message).await
    }

    pub async fn list_messages(&self, agent_id: &str, limit: Option<usize>) -> Vec<AgentMessage> {
        let messages: Vec<AgentMessage> = self
            .store
            .get(&format!("messages.{agent_id}"))
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
            Some(limit) if limit > 0 && messages.len() > limit => {
                messages[messages.len() - limit..].to_vec()
            }
            _ => messages,
        }
    }

    pub async fn enqueue_inbox(&self, agent_id: &str, message: &AgentMessage) -> Result<()> {
        self.push_capped(&format!("inbox.{agent_id}"), message).await
    }

    /// Atomically read the inbox and reset it to empty.
    pub async fn drain_inbox(&self, agent_id: &str) -> Result<Vec<AgentMessage>> {
        let key = format!("inbox.{agent_id}");
        let drained = self
            .store
            .get(&key)
            .await
            .and_then(|v| v.as_array().cloned())
            .unwrap_or_default();
        self.store.set(&key, Value::Array(Vec::new())).await?;
        Ok(drained
            .into_iter()
            .filter_map(|entry| serde_json::from_value(entry).ok())
            .collect())
    }

    pub async fn peek_inbox_count(&self, agent_id: &str) -> usize {
        self.store
            .get(&format!("inbox.{agent_id}"))
            .await
            .and_then(|v| v.as_array().map(|entries| entries.len()))
            .unwrap_or(0)
    }

    async fn push_capped(&self, key: &str, message: &AgentMessage) -> Result<()> {
        let mut entries = self
            .store
            .get(key)
            .await
            .and_then(|v| v.as_array().cloned())
            .unwrap_or_default();
        entries.push(serde_json::to_value(message)?);
        if entries.len() > KEEP_LAST {
            let excess = entries.len() - KEEP_LAST;
            entries.drain(..excess);
        }
        self.store.set(key, Value::Array(entries)).await
    }
}
