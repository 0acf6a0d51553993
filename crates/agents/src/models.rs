//! Agent runtime data models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: String,
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub name: String,
    pub created_at: DateTime<Utc>,
}

impl Agent {
    pub fn new(id: impl Into<String>, parent_id: Option<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            parent_id,
            name: name.into(),
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentMessage {
    pub id: String,
    pub agent_id: String,
    pub role: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl AgentMessage {
    pub fn new(
        agent_id: impl Into<String>,
        role: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            agent_id: agent_id.into(),
            role: role.into(),
            content: content.into(),
            created_at: Utc::now(),
        }
    }
}
