//! SQLite-backed episodic store with FTS5.
//!
//! One connection per store, guarded by a mutex and driven through
//! `spawn_blocking`. When the SQLite build lacks FTS5 the store falls back
//! to a case-insensitive substring scan behind the same interface.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection};

use cerise_domain::error::{Error, Result};

use crate::store::MemoryStore;
use crate::types::MemoryRecord;

pub struct SqliteMemoryStore {
    conn: Arc<Mutex<Connection>>,
    fts_enabled: bool,
}

impl SqliteMemoryStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(Error::Io)?;
            }
        }
        let conn = Connection::open(path).map_err(sql_err)?;
        Self::init(conn)
    }

    /// In-memory database, mainly for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(sql_err)?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS memories (
                id TEXT PRIMARY KEY,
                session_id TEXT,
                role TEXT,
                content TEXT,
                metadata TEXT,
                created_at REAL,
                expires_at REAL
            )",
            [],
        )
        .map_err(sql_err)?;
        let fts_enabled = conn
            .execute(
                "CREATE VIRTUAL TABLE IF NOT EXISTS memories_fts
                 USING fts5(id, content, session_id, tokenize='unicode61')",
                [],
            )
            .is_ok();
        if !fts_enabled {
            tracing::warn!("SQLite build lacks FTS5, falling back to substring scan");
        }
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            fts_enabled,
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> rusqlite::Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock();
            f(&guard).map_err(sql_err)
        })
        .await
        .map_err(|e| Error::Other(format!("sqlite task failed: {e}")))?
    }

    fn purge_expired_sync(conn: &Connection) -> rusqlite::Result<usize> {
        let now = Utc::now().timestamp_millis() as f64 / 1000.0;
        let purged = conn.execute(
            "DELETE FROM memories WHERE expires_at IS NOT NULL AND expires_at <= ?1",
            params![now],
        )?;
        if purged > 0 {
            let _ = conn.execute(
                "DELETE FROM memories_fts WHERE id NOT IN (SELECT id FROM memories)",
                [],
            );
        }
        Ok(purged)
    }

    fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<MemoryRecord> {
        let metadata: Option<String> = row.get("metadata")?;
        let created_at: f64 = row.get("created_at")?;
        Ok(MemoryRecord {
            id: row.get("id")?,
            session_id: row.get("session_id")?,
            role: row.get("role")?,
            content: row.get("content")?,
            metadata: metadata
                .and_then(|raw| serde_json::from_str(&raw).ok())
                .unwrap_or_default(),
            created_at: timestamp_to_datetime(created_at),
        })
    }
}

#[async_trait]
impl MemoryStore for SqliteMemoryStore {
    async fn add(&self, record: MemoryRecord, expires_at: Option<DateTime<Utc>>) -> Result<()> {
        let fts = self.fts_enabled;
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO memories
                 (id, session_id, role, content, metadata, created_at, expires_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    record.id,
                    record.session_id,
                    record.role,
                    record.content,
                    serde_json::to_string(&record.metadata).unwrap_or_default(),
                    datetime_to_timestamp(record.created_at),
                    expires_at.map(datetime_to_timestamp),
                ],
            )?;
            if fts {
                conn.execute(
                    "INSERT OR REPLACE INTO memories_fts (id, content, session_id)
                     VALUES (?1, ?2, ?3)",
                    params![record.id, record.content, record.session_id],
                )?;
            }
            Ok(())
        })
        .await
    }

    async fn get(&self, record_id: &str) -> Result<Option<MemoryRecord>> {
        let record_id = record_id.to_string();
        self.with_conn(move |conn| {
            Self::purge_expired_sync(conn)?;
            let mut stmt = conn.prepare("SELECT * FROM memories WHERE id = ?1")?;
            let mut rows = stmt.query(params![record_id])?;
            match rows.next()? {
                Some(row) => Ok(Some(Self::row_to_record(row)?)),
                None => Ok(None),
            }
        })
        .await
    }

    async fn list(&self, session_id: Option<&str>) -> Result<Vec<MemoryRecord>> {
        let session_id = session_id.map(str::to_string);
        self.with_conn(move |conn| {
            Self::purge_expired_sync(conn)?;
            let (sql, bind): (&str, Vec<String>) = match &session_id {
                Some(session) => (
                    "SELECT * FROM memories WHERE session_id = ?1 ORDER BY created_at ASC",
                    vec![session.clone()],
                ),
                None => ("SELECT * FROM memories ORDER BY created_at ASC", Vec::new()),
            };
            let mut stmt = conn.prepare(sql)?;
            let rows = stmt.query_map(rusqlite::params_from_iter(bind.iter()), |row| {
                Self::row_to_record(row)
            })?;
            rows.collect()
        })
        .await
    }

    async fn delete(&self, record_ids: &[String]) -> Result<()> {
        if record_ids.is_empty() {
            return Ok(());
        }
        let record_ids = record_ids.to_vec();
        let fts = self.fts_enabled;
        self.with_conn(move |conn| {
            for id in &record_ids {
                conn.execute("DELETE FROM memories WHERE id = ?1", params![id])?;
                if fts {
                    conn.execute("DELETE FROM memories_fts WHERE id = ?1", params![id])?;
                }
            }
            Ok(())
        })
        .await
    }

    async fn count(&self, session_id: Option<&str>) -> Result<usize> {
        let session_id = session_id.map(str::to_string);
        self.with_conn(move |conn| {
            Self::purge_expired_sync(conn)?;
            let count: i64 = match &session_id {
                Some(session) => conn.query_row(
                    "SELECT COUNT(1) FROM memories WHERE session_id = ?1",
                    params![session],
                    |row| row.get(0),
                )?,
                None => conn.query_row("SELECT COUNT(1) FROM memories", [], |row| row.get(0))?,
            };
            Ok(count as usize)
        })
        .await
    }

    async fn touch(&self, record_id: &str, accessed_at: DateTime<Utc>) -> Result<()> {
        let record_id = record_id.to_string();
        self.with_conn(move |conn| {
            let metadata: Option<String> = conn
                .query_row(
                    "SELECT metadata FROM memories WHERE id = ?1",
                    params![record_id],
                    |row| row.get(0),
                )
                .map(Some)
                .or_else(|e| match e {
                    rusqlite::Error::QueryReturnedNoRows => Ok(None),
                    other => Err(other),
                })?;
            let Some(metadata) = metadata else {
                return Ok(());
            };
            let mut map: serde_json::Map<String, serde_json::Value> = if metadata.is_empty() {
                serde_json::Map::new()
            } else {
                serde_json::from_str(&metadata).unwrap_or_default()
            };
            let count = map
                .get("access_count")
                .and_then(serde_json::Value::as_u64)
                .unwrap_or(0);
            map.insert("access_count".into(), serde_json::Value::from(count + 1));
            map.insert(
                "last_accessed".into(),
                serde_json::Value::from(accessed_at.to_rfc3339()),
            );
            conn.execute(
                "UPDATE memories SET metadata = ?1 WHERE id = ?2",
                params![serde_json::to_string(&map).unwrap_or_default(), record_id],
            )?;
            Ok(())
        })
        .await
    }

    async fn purge_expired(&self) -> Result<usize> {
        self.with_conn(Self::purge_expired_sync).await
    }

    fn supports_fts(&self) -> bool {
        true
    }

    async fn search_fts(
        &self,
        query: &str,
        session_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<(String, f64)>> {
        let query = query.to_string();
        let session_id = session_id.map(str::to_string);
        if self.fts_enabled {
            let result = self
                .with_conn({
                    let query = query.clone();
                    let session_id = session_id.clone();
                    move |conn| {
                        Self::purge_expired_sync(conn)?;
                        let (sql, bind): (String, Vec<String>) = match &session_id {
                            Some(session) => (
                                format!(
                                    "SELECT memories_fts.id AS id, bm25(memories_fts) AS score
                                     FROM memories_fts
                                     WHERE memories_fts MATCH ?1 AND session_id = ?2
                                     ORDER BY score ASC LIMIT {limit}"
                                ),
                                vec![query.clone(), session.clone()],
                            ),
                            None => (
                                format!(
                                    "SELECT memories_fts.id AS id, bm25(memories_fts) AS score
                                     FROM memories_fts
                                     WHERE memories_fts MATCH ?1
                                     ORDER BY score ASC LIMIT {limit}"
                                ),
                                vec![query.clone()],
                            ),
                        };
                        let mut stmt = conn.prepare(&sql)?;
                        let rows = stmt.query_map(
                            rusqlite::params_from_iter(bind.iter()),
                            |row| {
                                let id: String = row.get("id")?;
                                let score: f64 = row.get("score")?;
                                Ok((id, (1.0 / (1.0 + score)).max(0.0)))
                            },
                        )?;
                        rows.collect()
                    }
                })
                .await;
            match result {
                Ok(rows) => return Ok(rows),
                Err(e) => {
                    // Malformed MATCH expressions degrade to the scan path.
                    tracing::debug!(error = %e, "FTS query failed, falling back to scan");
                }
            }
        }
        self.substring_scan(&query, session_id.as_deref(), limit).await
    }
}

impl SqliteMemoryStore {
    async fn substring_scan(
        &self,
        query: &str,
        session_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<(String, f64)>> {
        let needle = query.to_lowercase();
        let records = self.list(session_id).await?;
        let mut hits: Vec<(String, f64)> = records
            .iter()
            .filter(|record| record.content.to_lowercase().contains(&needle))
            .map(|record| (record.id.clone(), 0.5))
            .collect();
        hits.truncate(limit);
        Ok(hits)
    }
}

fn sql_err(e: rusqlite::Error) -> Error {
    Error::Other(format!("sqlite: {e}"))
}

fn datetime_to_timestamp(at: DateTime<Utc>) -> f64 {
    at.timestamp_millis() as f64 / 1000.0
}

fn timestamp_to_datetime(raw: f64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt((raw * 1000.0) as i64)
        .single()
        .unwrap_or_else(Utc::now)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn add_get_round_trip() {
        let store = SqliteMemoryStore::open_in_memory().unwrap();
        let mut record = MemoryRecord::new("s1", "user", "hello world");
        record
            .metadata
            .insert("importance".into(), serde_json::Value::from(70));
        store.add(record.clone(), None).await.unwrap();

        let got = store.get(&record.id).await.unwrap().unwrap();
        assert_eq!(got.content, "hello world");
        assert_eq!(got.importance(), Some(70.0));
        assert_eq!(got.session_id, "s1");
    }

    #[tokio::test]
    async fn fts_search_finds_by_content() {
        let store = SqliteMemoryStore::open_in_memory().unwrap();
        let r1 = MemoryRecord::new("s1", "user", "the quick brown fox");
        let r2 = MemoryRecord::new("s1", "user", "slow green turtle");
        store.add(r1.clone(), None).await.unwrap();
        store.add(r2, None).await.unwrap();

        let hits = store.search_fts("fox", Some("s1"), 5).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0, r1.id);
        assert!(hits[0].1 > 0.0);
    }

    #[tokio::test]
    async fn session_filter_applies_to_search() {
        let store = SqliteMemoryStore::open_in_memory().unwrap();
        store
            .add(MemoryRecord::new("s1", "user", "shared keyword"), None)
            .await
            .unwrap();
        store
            .add(MemoryRecord::new("s2", "user", "shared keyword"), None)
            .await
            .unwrap();
        let hits = store.search_fts("keyword", Some("s2"), 5).await.unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[tokio::test]
    async fn expired_records_are_purged_on_read() {
        let store = SqliteMemoryStore::open_in_memory().unwrap();
        let record = MemoryRecord::new("s1", "user", "fleeting");
        let past = Utc::now() - chrono::Duration::seconds(5);
        store.add(record.clone(), Some(past)).await.unwrap();
        assert!(store.get(&record.id).await.unwrap().is_none());
        assert_eq!(store.count(Some("s1")).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn touch_updates_metadata() {
        let store = SqliteMemoryStore::open_in_memory().unwrap();
        let record = MemoryRecord::new("s1", "user", "touched");
        store.add(record.clone(), None).await.unwrap();
        store.touch(&record.id, Utc::now()).await.unwrap();
        store.touch(&record.id, Utc::now()).await.unwrap();
        let got = store.get(&record.id).await.unwrap().unwrap();
        assert_eq!(got.access_count(), 2);
    }

    #[tokio::test]
    async fn delete_removes_from_fts_too() {
        let store = SqliteMemoryStore::open_in_memory().unwrap();
        let record = MemoryRecord::new("s1", "user", "deleted soon");
        store.add(record.clone(), None).await.unwrap();
        store.delete(&[record.id.clone()]).await.unwrap();
        assert!(store.search_fts("deleted", None, 5).await.unwrap().is_empty());
    }
}
