//! SQLite-backed knowledge-graph store.
//!
//! Triples are indexed by session; search is a LIKE match over subject,
//! predicate, and object. `search_related` serves associative recall hops.

use std::path::Path;
use std::sync::Arc;

use chrono::{TimeZone, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection};

use cerise_domain::error::{Error, Result};

use crate::types::KgTriple;

pub struct SqliteKgStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteKgStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(Error::Io)?;
            }
        }
        Self::init(Connection::open(path).map_err(sql_err)?)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory().map_err(sql_err)?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS kg_triples (
                triple_id TEXT PRIMARY KEY,
                session_id TEXT,
                subject TEXT,
                predicate TEXT,
                object TEXT,
                memory_id TEXT,
                created_at REAL,
                score REAL
            )",
            [],
        )
        .map_err(sql_err)?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS kg_triples_session ON kg_triples (session_id)",
            [],
        )
        .map_err(sql_err)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
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

    /// Persist extracted triples, tagged with the source memory id.
    pub async fn add_triples(
        &self,
        session_id: &str,
        triples: Vec<(String, String, String)>,
        memory_id: Option<&str>,
    ) -> Result<()> {
        if triples.is_empty() {
            return Ok(());
        }
        let session_id = session_id.to_string();
        let memory_id = memory_id.map(str::to_string);
        self.with_conn(move |conn| {
            let now = Utc::now().timestamp_millis() as f64 / 1000.0;
            for (subject, predicate, object) in &triples {
                conn.execute(
                    "INSERT OR REPLACE INTO kg_triples
                     (triple_id, session_id, subject, predicate, object, memory_id, created_at, score)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                    params![
                        uuid::Uuid::new_v4().to_string(),
                        session_id,
                        subject,
                        predicate,
                        object,
                        memory_id,
                        now,
                        0.3f64,
                    ],
                )?;
            }
            Ok(())
        })
        .await
    }

    /// Triples whose subject, predicate, or object contains the query.
    pub async fn search(
        &self,
        query: &str,
        session_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<KgTriple>> {
        let like = format!("%{}%", query.trim());
        let session_id = session_id.map(str::to_string);
        self.with_conn(move |conn| {
            let (sql, bind): (String, Vec<String>) = match &session_id {
                Some(session) => (
                    format!(
                        "SELECT * FROM kg_triples
                         WHERE session_id = ?1
                           AND (subject LIKE ?2 OR predicate LIKE ?2 OR object LIKE ?2)
                         ORDER BY created_at DESC LIMIT {limit}"
                    ),
                    vec![session.clone(), like.clone()],
                ),
                None => (
                    format!(
                        "SELECT * FROM kg_triples
                         WHERE subject LIKE ?1 OR predicate LIKE ?1 OR object LIKE ?1
                         ORDER BY created_at DESC LIMIT {limit}"
                    ),
                    vec![like.clone()],
                ),
            };
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(rusqlite::params_from_iter(bind.iter()), row_to_triple)?;
            rows.collect()
        })
        .await
    }

    /// Triples touching any of the given entities (subject or object match).
    pub async fn search_related(
        &self,
        entities: &[String],
        session_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<KgTriple>> {
        if entities.is_empty() {
            return Ok(Vec::new());
        }
        let entities: Vec<String> = entities.iter().map(|e| e.to_lowercase()).collect();
        let session_id = session_id.map(str::to_string);
        self.with_conn(move |conn| {
            let mut clauses = Vec::new();
            let mut bind: Vec<String> = Vec::new();
            if let Some(session) = &session_id {
                clauses.push(format!("session_id = ?{}", bind.len() + 1));
                bind.push(session.clone());
            }
            let mut entity_clauses = Vec::new();
            for entity in &entities {
                entity_clauses.push(format!(
                    "(LOWER(subject) = ?{n} OR LOWER(object) = ?{n})",
                    n = bind.len() + 1
                ));
                bind.push(entity.clone());
            }
            clauses.push(format!("({})", entity_clauses.join(" OR ")));
            let sql = format!(
                "SELECT * FROM kg_triples WHERE {} ORDER BY created_at DESC LIMIT {limit}",
                clauses.join(" AND ")
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(rusqlite::params_from_iter(bind.iter()), row_to_triple)?;
            rows.collect()
        })
        .await
    }

    pub async fn delete_for_memory(&self, memory_id: &str) -> Result<()> {
        let memory_id = memory_id.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "DELETE FROM kg_triples WHERE memory_id = ?1",
                params![memory_id],
            )?;
            Ok(())
        })
        .await
    }
}

fn row_to_triple(row: &rusqlite::Row<'_>) -> rusqlite::Result<KgTriple> {
    let created_at: f64 = row.get("created_at")?;
    Ok(KgTriple {
        triple_id: row.get("triple_id")?,
        session_id: row.get("session_id")?,
        subject: row.get("subject")?,
        predicate: row.get("predicate")?,
        object: row.get("object")?,
        memory_id: row.get("memory_id")?,
        created_at: Utc
            .timestamp_millis_opt((created_at * 1000.0) as i64)
            .single()
            .unwrap_or_else(Utc::now),
        score: row.get("score")?,
    })
}

fn sql_err(e: rusqlite::Error) -> Error {
    Error::Other(format!("sqlite: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn add_and_search_by_token() {
        let store = SqliteKgStore::open_in_memory().unwrap();
        store
            .add_triples(
                "s1",
                vec![
                    ("alice".into(), "likes".into(), "coffee".into()),
                    ("bob".into(), "has".into(), "a dog".into()),
                ],
                Some("m1"),
            )
            .await
            .unwrap();

        let hits = store.search("coffee", Some("s1"), 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].subject, "alice");
        assert_eq!(hits[0].memory_id.as_deref(), Some("m1"));
    }

    #[tokio::test]
    async fn search_related_matches_subject_or_object() {
        let store = SqliteKgStore::open_in_memory().unwrap();
        store
            .add_triples(
                "s1",
                vec![
                    ("alice".into(), "likes".into(), "coffee".into()),
                    ("coffee".into(), "is".into(), "a drink".into()),
                    ("bob".into(), "likes".into(), "tea".into()),
                ],
                None,
            )
            .await
            .unwrap();

        let related = store
            .search_related(&["coffee".to_string()], Some("s1"), 10)
            .await
            .unwrap();
        assert_eq!(related.len(), 2);
    }

    #[tokio::test]
    async fn delete_for_memory_removes_tagged_triples() {
        let store = SqliteKgStore::open_in_memory().unwrap();
        store
            .add_triples("s1", vec![("a".into(), "is".into(), "b".into())], Some("m1"))
            .await
            .unwrap();
        store.delete_for_memory("m1").await.unwrap();
        assert!(store.search("a", Some("s1"), 10).await.unwrap().is_empty());
    }
}
