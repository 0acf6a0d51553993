//! In-process dialogue sessions.
//!
//! Sessions live for the process lifetime only; long-term state belongs to
//! the memory engine.

use std::collections::HashMap;

use parking_lot::RwLock;
use serde_json::{Map, Value};

use cerise_domain::tool::Message;

/// One conversation: ordered messages plus free-form metadata.
#[derive(Debug, Clone, Default)]
pub struct Session {
    pub id: String,
    pub messages: Vec<Message>,
    pub metadata: Map<String, Value>,
}

impl Session {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            messages: Vec::new(),
            metadata: Map::new(),
        }
    }
}

/// Process-wide session map.
#[derive(Default)]
pub struct SessionManager {
    sessions: RwLock<HashMap<String, Session>>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a session, minting an id when none is given. An existing id is
    /// returned untouched.
    pub fn create_session(&self, session_id: Option<&str>) -> Session {
        let id = session_id
            .map(str::to_string)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let mut sessions = self.sessions.write();
        sessions
            .entry(id.clone())
            .or_insert_with(|| Session::new(id))
            .clone()
    }

    pub fn get_session(&self, session_id: &str) -> Option<Session> {
        self.sessions.read().get(session_id).cloned()
    }

    pub fn delete_session(&self, session_id: &str) -> bool {
        self.sessions.write().remove(session_id).is_some()
    }

    pub fn session_ids(&self) -> Vec<String> {
        self.sessions.read().keys().cloned().collect()
    }

    /// Append a message to a session, creating it on first use.
    pub fn append_message(&self, session_id: &str, message: Message) {
        let mut sessions = self.sessions.write();
        sessions
            .entry(session_id.to_string())
            .or_insert_with(|| Session::new(session_id))
            .messages
            .push(message);
    }

    /// Snapshot of the session's messages.
    pub fn messages(&self, session_id: &str) -> Vec<Message> {
        self.sessions
            .read()
            .get(session_id)
            .map(|session| session.messages.clone())
            .unwrap_or_default()
    }
}
