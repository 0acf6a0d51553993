use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Event flowing over the bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    /// Dotted event type from the closed contract set.
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub data: Map<String, Value>,
    #[serde(default)]
    pub source: String,
    pub timestamp: DateTime<Utc>,
}

impl Event {
    pub fn new(
        event_type: impl Into<String>,
        data: Map<String, Value>,
        source: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            event_type: event_type.into(),
            data,
            source: source.into(),
            timestamp: Utc::now(),
        }
    }

    /// Serialize to a JSON value for broker transport (primitives only,
    /// timestamp as RFC 3339 text).
    pub fn to_value(&self) -> Value {
        serde_json::json!({
            "id": self.id,
            "type": self.event_type,
            "data": self.data,
            "source": self.source,
            "timestamp": self.timestamp.to_rfc3339(),
        })
    }

    pub fn from_value(value: Value) -> Option<Self> {
        serde_json::from_value(value).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broker_payload_round_trip() {
        let mut data = Map::new();
        data.insert("session_id".into(), Value::String("s1".into()));
        let event = Event::new("dialogue.user_message", data, "test");
        let restored = Event::from_value(event.to_value()).unwrap();
        assert_eq!(restored.id, event.id);
        assert_eq!(restored.event_type, "dialogue.user_message");
        assert_eq!(restored.data["session_id"], "s1");
        assert_eq!(restored.timestamp, event.timestamp);
    }
}
