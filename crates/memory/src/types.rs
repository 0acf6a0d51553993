//! Memory record types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Single episodic memory record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub id: String,
    pub session_id: String,
    pub role: String,
    pub content: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    pub created_at: DateTime<Utc>,
}

impl MemoryRecord {
    pub fn new(
        session_id: impl Into<String>,
        role: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            session_id: session_id.into(),
            role: role.into(),
            content: content.into(),
            metadata: Map::new(),
            created_at: Utc::now(),
        }
    }

    pub fn with_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = metadata;
        self
    }

    /// Emotion block attached by the emotion analyzer, if any.
    pub fn emotion(&self) -> Option<&Map<String, Value>> {
        self.metadata.get("emotion").and_then(Value::as_object)
    }

    /// Importance in `[0, 100]`.
    pub fn importance(&self) -> Option<f64> {
        self.metadata.get("importance").and_then(Value::as_f64)
    }

    /// Emotional impact in `[0, 100]`.
    pub fn emotional_impact(&self) -> Option<f64> {
        self.metadata.get("emotional_impact").and_then(Value::as_f64)
    }

    pub fn access_count(&self) -> u64 {
        self.metadata
            .get("access_count")
            .and_then(Value::as_u64)
            .unwrap_or(0)
    }

    pub fn category(&self) -> Option<&str> {
        self.metadata.get("category").and_then(Value::as_str)
    }

    pub fn tags(&self) -> Vec<String> {
        self.metadata
            .get("tags")
            .and_then(Value::as_array)
            .map(|tags| {
                tags.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// True for compression summary records.
    pub fn is_summary(&self) -> bool {
        self.metadata
            .get("summary")
            .and_then(Value::as_bool)
            .unwrap_or(false)
            || self
                .metadata
                .get("compressed")
                .and_then(Value::as_bool)
                .unwrap_or(false)
    }

    /// Bump `access_count` and stamp `last_accessed`.
    pub fn touch(&mut self, accessed_at: DateTime<Utc>) {
        let count = self.access_count();
        self.metadata
            .insert("access_count".into(), Value::from(count + 1));
        self.metadata
            .insert("last_accessed".into(), Value::from(accessed_at.to_rfc3339()));
    }
}

/// Recall result with its fused score.
#[derive(Debug, Clone)]
pub struct MemoryResult {
    pub record: MemoryRecord,
    pub score: f64,
}

/// Knowledge-graph triple.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KgTriple {
    pub triple_id: String,
    pub session_id: String,
    pub subject: String,
    pub predicate: String,
    pub object: String,
    pub memory_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub score: f64,
}

/// Core profile layer record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreProfile {
    pub profile_id: String,
    pub summary: String,
    pub session_id: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Semantic fact layer record, unique per `(session_id, subject, predicate)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SemanticFact {
    pub fact_id: String,
    pub session_id: String,
    pub subject: String,
    pub predicate: String,
    pub object: String,
    pub updated_at: DateTime<Utc>,
}

/// Procedural habit layer record, unique per
/// `(session_id, task_type, instruction)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProceduralHabit {
    pub habit_id: String,
    pub session_id: String,
    pub task_type: String,
    pub instruction: String,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn touch_increments_and_stamps() {
        let mut record = MemoryRecord::new("s1", "user", "hello");
        assert_eq!(record.access_count(), 0);
        let at = Utc::now();
        record.touch(at);
        record.touch(at);
        assert_eq!(record.access_count(), 2);
        assert_eq!(
            record.metadata["last_accessed"].as_str().unwrap(),
            at.to_rfc3339()
        );
    }

    #[test]
    fn summary_detection() {
        let mut record = MemoryRecord::new("s1", "system", "Memory Summary:\n- x");
        assert!(!record.is_summary());
        record.metadata.insert("compressed".into(), Value::from(true));
        assert!(record.is_summary());
    }
}
