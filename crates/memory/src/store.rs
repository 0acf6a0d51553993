//! Episodic memory storage backends.

use std::collections::VecDeque;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::Mutex;

use cerise_domain::error::Result;
use cerise_state::StateStore;

use crate::types::MemoryRecord;

/// Storage backend for episodic memory records.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    async fn add(&self, record: MemoryRecord, expires_at: Option<DateTime<Utc>>) -> Result<()>;

    async fn get(&self, record_id: &str) -> Result<Option<MemoryRecord>>;

    /// Records ordered by creation time ascending, optionally filtered by
    /// session.
    async fn list(&self, session_id: Option<&str>) -> Result<Vec<MemoryRecord>>;

    async fn delete(&self, record_ids: &[String]) -> Result<()>;

    async fn count(&self, session_id: Option<&str>) -> Result<usize>;

    /// Update access metadata for a record.
    async fn touch(&self, record_id: &str, accessed_at: DateTime<Utc>) -> Result<()>;

    /// Remove expired records. Called by the maintenance sweep; SQLite-backed
    /// stores also purge opportunistically on read.
    async fn purge_expired(&self) -> Result<usize> {
        Ok(0)
    }

    /// True when the backend can serve ranked full-text queries.
    fn supports_fts(&self) -> bool {
        false
    }

    /// Ranked `(record_id, score)` full-text matches. Only meaningful when
    /// [`Self::supports_fts`] is true.
    async fn search_fts(
        &self,
        _query: &str,
        _session_id: Option<&str>,
        _limit: usize,
    ) -> Result<Vec<(String, f64)>> {
        Ok(Vec::new())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// In-memory store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Bounded in-memory store for tests and ephemeral sessions.
pub struct InMemoryStore {
    records: Mutex<VecDeque<(MemoryRecord, Option<DateTime<Utc>>)>>,
    max_records: usize,
}

impl InMemoryStore {
    pub fn new(max_records: usize) -> Self {
        Self {
            records: Mutex::new(VecDeque::new()),
            max_records: max_records.max(1),
        }
    }

    fn purge_locked(records: &mut VecDeque<(MemoryRecord, Option<DateTime<Utc>>)>) {
        let now = Utc::now();
        records.retain(|(_, expires_at)| expires_at.map(|at| at > now).unwrap_or(true));
    }
}

#[async_trait]
impl MemoryStore for InMemoryStore {
    async fn add(&self, record: MemoryRecord, expires_at: Option<DateTime<Utc>>) -> Result<()> {
        let mut records = self.records.lock().await;
        records.retain(|(existing, _)| existing.id != record.id);
        records.push_back((record, expires_at));
        while records.len() > self.max_records {
            records.pop_front();
        }
        Ok(())
    }

    async fn get(&self, record_id: &str) -> Result<Option<MemoryRecord>> {
        let mut records = self.records.lock().await;
        Self::purge_locked(&mut records);
        Ok(records
            .iter()
            .find(|(record, _)| record.id == record_id)
            .map(|(record, _)| record.clone()))
    }

    async fn list(&self, session_id: Option<&str>) -> Result<Vec<MemoryRecord>> {
        let mut records = self.records.lock().await;
        Self::purge_locked(&mut records);
        let mut out: Vec<MemoryRecord> = records
            .iter()
            .filter(|(record, _)| session_id.map(|s| record.session_id == s).unwrap_or(true))
            .map(|(record, _)| record.clone())
            .collect();
        out.sort_by_key(|record| record.created_at);
        Ok(out)
    }

    async fn delete(&self, record_ids: &[String]) -> Result<()> {
        if record_ids.is_empty() {
            return Ok(());
        }
        let mut records = self.records.lock().await;
        records.retain(|(record, _)| !record_ids.contains(&record.id));
        Ok(())
    }

    async fn count(&self, session_id: Option<&str>) -> Result<usize> {
        let mut records = self.records.lock().await;
        Self::purge_locked(&mut records);
        Ok(records
            .iter()
            .filter(|(record, _)| session_id.map(|s| record.session_id == s).unwrap_or(true))
            .count())
    }

    async fn touch(&self, record_id: &str, accessed_at: DateTime<Utc>) -> Result<()> {
        let mut records = self.records.lock().await;
        for (record, _) in records.iter_mut() {
            if record.id == record_id {
                record.touch(accessed_at);
            }
        }
        Ok(())
    }

    async fn purge_expired(&self) -> Result<usize> {
        let mut records = self.records.lock().await;
        let before = records.len();
        Self::purge_locked(&mut records);
        Ok(before - records.len())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// StateStore-backed store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Memory store persisted inside a [`StateStore`] JSON document.
pub struct StateMemoryStore {
    store: StateStore,
}

const RECORDS_KEY: &str = "memory.records";

impl StateMemoryStore {
    pub fn new(store: StateStore) -> Self {
        Self { store }
    }

    async fn load(&self) -> serde_json::Map<String, Value> {
        self.store
            .get(RECORDS_KEY)
            .await
            .and_then(|v| v.as_object().cloned())
            .unwrap_or_default()
    }

    fn entry_to_record(entry: &Value) -> Option<MemoryRecord> {
        serde_json::from_value(entry.get("record")?.clone()).ok()
    }

    fn entry_expired(entry: &Value, now: DateTime<Utc>) -> bool {
        entry
            .get("expires_at")
            .and_then(Value::as_str)
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map(|at| at.with_timezone(&Utc) <= now)
            .unwrap_or(false)
    }
}

#[async_trait]
impl MemoryStore for StateMemoryStore {
    async fn add(&self, record: MemoryRecord, expires_at: Option<DateTime<Utc>>) -> Result<()> {
        let mut records = self.load().await;
        let entry = serde_json::json!({
            "record": serde_json::to_value(&record)?,
            "expires_at": expires_at.map(|at| at.to_rfc3339()),
        });
        records.insert(record.id.clone(), entry);
        self.store.set(RECORDS_KEY, Value::Object(records)).await
    }

    async fn get(&self, record_id: &str) -> Result<Option<MemoryRecord>> {
        let records = self.load().await;
        let Some(entry) = records.get(record_id) else {
            return Ok(None);
        };
        if Self::entry_expired(entry, Utc::now()) {
            self.delete(&[record_id.to_string()]).await?;
            return Ok(None);
        }
        Ok(Self::entry_to_record(entry))
    }

    async fn list(&self, session_id: Option<&str>) -> Result<Vec<MemoryRecord>> {
        let records = self.load().await;
        let now = Utc::now();
        let mut expired = Vec::new();
        let mut out = Vec::new();
        for (id, entry) in &records {
            if Self::entry_expired(entry, now) {
                expired.push(id.clone());
                continue;
            }
            let Some(record) = Self::entry_to_record(entry) else {
                continue;
            };
            if session_id.map(|s| record.session_id == s).unwrap_or(true) {
                out.push(record);
            }
        }
        if !expired.is_empty() {
            self.delete(&expired).await?;
        }
        out.sort_by_key(|record| record.created_at);
        Ok(out)
    }

    async fn delete(&self, record_ids: &[String]) -> Result<()> {
        if record_ids.is_empty() {
            return Ok(());
        }
        let mut records = self.load().await;
        for id in record_ids {
            records.remove(id);
        }
        self.store.set(RECORDS_KEY, Value::Object(records)).await
    }

    async fn count(&self, session_id: Option<&str>) -> Result<usize> {
        Ok(self.list(session_id).await?.len())
    }

    async fn touch(&self, record_id: &str, accessed_at: DateTime<Utc>) -> Result<()> {
        let mut records = self.load().await;
        let Some(entry) = records.get_mut(record_id) else {
            return Ok(());
        };
        let Some(mut record) = Self::entry_to_record(entry) else {
            return Ok(());
        };
        record.touch(accessed_at);
        entry["record"] = serde_json::to_value(&record)?;
        self.store.set(RECORDS_KEY, Value::Object(records)).await
    }

    async fn purge_expired(&self) -> Result<usize> {
        let records = self.load().await;
        let now = Utc::now();
        let expired: Vec<String> = records
            .iter()
            .filter(|(_, entry)| Self::entry_expired(entry, now))
            .map(|(id, _)| id.clone())
            .collect();
        let count = expired.len();
        self.delete(&expired).await?;
        Ok(count)
    }
}
