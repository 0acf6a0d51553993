//! SQLite backends for the layer stores. One file per layer.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection};

use cerise_domain::error::{Error, Result};

use crate::layers::{CoreProfileLayer, ProceduralHabitsLayer, SemanticFactsLayer};
use crate::types::{CoreProfile, ProceduralHabit, SemanticFact};

macro_rules! sqlite_layer {
    ($name:ident, $schema:expr) => {
        pub struct $name {
            conn: Arc<Mutex<Connection>>,
            max_records: usize,
        }

        impl $name {
            pub fn open(path: &str, max_records: usize) -> Result<Self> {
                let path = Path::new(path);
                if let Some(parent) = path.parent() {
                    if !parent.as_os_str().is_empty() {
                        std::fs::create_dir_all(parent).map_err(Error::Io)?;
                    }
                }
                Self::init(Connection::open(path).map_err(sql_err)?, max_records)
            }

            pub fn open_in_memory(max_records: usize) -> Result<Self> {
                Self::init(Connection::open_in_memory().map_err(sql_err)?, max_records)
            }

            fn init(conn: Connection, max_records: usize) -> Result<Self> {
                conn.execute_batch($schema).map_err(sql_err)?;
                Ok(Self {
                    conn: Arc::new(Mutex::new(conn)),
                    max_records,
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
        }
    };
}

sqlite_layer!(
    SqliteCoreProfiles,
    "CREATE TABLE IF NOT EXISTS core_profiles (
        profile_id TEXT PRIMARY KEY,
        summary TEXT,
        session_id TEXT,
        updated_at REAL
    );
    CREATE INDEX IF NOT EXISTS core_profiles_session ON core_profiles (session_id);"
);

sqlite_layer!(
    SqliteSemanticFacts,
    "CREATE TABLE IF NOT EXISTS semantic_facts (
        fact_id TEXT PRIMARY KEY,
        session_id TEXT,
        subject TEXT,
        predicate TEXT,
        object_value TEXT,
        updated_at REAL
    );
    CREATE UNIQUE INDEX IF NOT EXISTS semantic_facts_key
        ON semantic_facts (session_id, subject, predicate);
    CREATE INDEX IF NOT EXISTS semantic_facts_subject ON semantic_facts (subject);"
);

sqlite_layer!(
    SqliteProceduralHabits,
    "CREATE TABLE IF NOT EXISTS procedural_habits (
        habit_id TEXT PRIMARY KEY,
        session_id TEXT,
        task_type TEXT,
        instruction TEXT,
        updated_at REAL
    );
    CREATE UNIQUE INDEX IF NOT EXISTS procedural_habits_key
        ON procedural_habits (session_id, task_type, instruction);
    CREATE INDEX IF NOT EXISTS procedural_habits_task ON procedural_habits (task_type);"
);

#[async_trait]
impl CoreProfileLayer for SqliteCoreProfiles {
    async fn upsert_profile(
        &self,
        profile_id: &str,
        summary: &str,
        session_id: Option<&str>,
    ) -> Result<CoreProfile> {
        let profile = CoreProfile {
            profile_id: profile_id.to_string(),
            summary: summary.to_string(),
            session_id: session_id.map(str::to_string),
            updated_at: Utc::now(),
        };
        let insert = profile.clone();
        let max_records = self.max_records;
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO core_profiles (profile_id, summary, session_id, updated_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(profile_id) DO UPDATE SET
                     summary = excluded.summary,
                     session_id = excluded.session_id,
                     updated_at = excluded.updated_at",
                params![
                    insert.profile_id,
                    insert.summary,
                    insert.session_id,
                    to_ts(insert.updated_at),
                ],
            )?;
            trim(conn, "core_profiles", "profile_id", max_records)
        })
        .await?;
        Ok(profile)
    }

    async fn get_profile(&self, profile_id: &str) -> Result<Option<CoreProfile>> {
        let profile_id = profile_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare("SELECT * FROM core_profiles WHERE profile_id = ?1")?;
            let mut rows = stmt.query(params![profile_id])?;
            match rows.next()? {
                Some(row) => Ok(Some(row_to_profile(row)?)),
                None => Ok(None),
            }
        })
        .await
    }

    async fn list_profiles(&self, session_id: Option<&str>) -> Result<Vec<CoreProfile>> {
        let session_id = session_id.map(str::to_string);
        self.with_conn(move |conn| {
            let (sql, bind): (&str, Vec<String>) = match &session_id {
                Some(session) => (
                    "SELECT * FROM core_profiles WHERE session_id = ?1 ORDER BY updated_at DESC",
                    vec![session.clone()],
                ),
                None => ("SELECT * FROM core_profiles ORDER BY updated_at DESC", Vec::new()),
            };
            let mut stmt = conn.prepare(sql)?;
            let rows = stmt.query_map(rusqlite::params_from_iter(bind.iter()), row_to_profile)?;
            rows.collect()
        })
        .await
    }
}

#[async_trait]
impl SemanticFactsLayer for SqliteSemanticFacts {
    async fn upsert_fact(
        &self,
        fact_id: &str,
        session_id: &str,
        subject: &str,
        predicate: &str,
        object: &str,
    ) -> Result<SemanticFact> {
        let updated_at = Utc::now();
        let args = (
            fact_id.to_string(),
            session_id.to_string(),
            subject.to_string(),
            predicate.to_string(),
            object.to_string(),
        );
        let max_records = self.max_records;
        let stored = self
            .with_conn(move |conn| {
                conn.execute(
                    "INSERT INTO semantic_facts
                     (fact_id, session_id, subject, predicate, object_value, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                     ON CONFLICT(session_id, subject, predicate) DO UPDATE SET
                         object_value = excluded.object_value,
                         updated_at = excluded.updated_at",
                    params![args.0, args.1, args.2, args.3, args.4, to_ts(updated_at)],
                )?;
                trim(conn, "semantic_facts", "fact_id", max_records)?;
                let mut stmt = conn.prepare(
                    "SELECT * FROM semantic_facts
                     WHERE session_id = ?1 AND subject = ?2 AND predicate = ?3",
                )?;
                let mut rows = stmt.query(params![args.1, args.2, args.3])?;
                match rows.next()? {
                    Some(row) => Ok(Some(row_to_fact(row)?)),
                    None => Ok(None),
                }
            })
            .await?;
        Ok(stored.unwrap_or(SemanticFact {
            fact_id: fact_id.to_string(),
            session_id: session_id.to_string(),
            subject: subject.to_string(),
            predicate: predicate.to_string(),
            object: object.to_string(),
            updated_at,
        }))
    }

    async fn list_facts(
        &self,
        session_id: Option<&str>,
        subject: Option<&str>,
    ) -> Result<Vec<SemanticFact>> {
        let session_id = session_id.map(str::to_string);
        let subject = subject.map(str::to_string);
        self.with_conn(move |conn| {
            let mut filters = Vec::new();
            let mut bind: Vec<String> = Vec::new();
            if let Some(session) = &session_id {
                filters.push(format!("session_id = ?{}", bind.len() + 1));
                bind.push(session.clone());
            }
            if let Some(subject) = &subject {
                filters.push(format!("subject = ?{}", bind.len() + 1));
                bind.push(subject.clone());
            }
            let where_clause = if filters.is_empty() {
                String::new()
            } else {
                format!(" WHERE {}", filters.join(" AND "))
            };
            let sql = format!("SELECT * FROM semantic_facts{where_clause} ORDER BY updated_at DESC");
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(rusqlite::params_from_iter(bind.iter()), row_to_fact)?;
            rows.collect()
        })
        .await
    }
}

#[async_trait]
impl ProceduralHabitsLayer for SqliteProceduralHabits {
    async fn record_habit(
        &self,
        habit_id: &str,
        session_id: &str,
        task_type: &str,
        instruction: &str,
    ) -> Result<ProceduralHabit> {
        let updated_at = Utc::now();
        let args = (
            habit_id.to_string(),
            session_id.to_string(),
            task_type.to_string(),
            instruction.to_string(),
        );
        let max_records = self.max_records;
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO procedural_habits
                 (habit_id, session_id, task_type, instruction, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(session_id, task_type, instruction) DO UPDATE SET
                     updated_at = excluded.updated_at",
                params![args.0, args.1, args.2, args.3, to_ts(updated_at)],
            )?;
            trim(conn, "procedural_habits", "habit_id", max_records)
        })
        .await?;
        Ok(ProceduralHabit {
            habit_id: habit_id.to_string(),
            session_id: session_id.to_string(),
            task_type: task_type.to_string(),
            instruction: instruction.to_string(),
            updated_at,
        })
    }

    async fn list_habits(
        &self,
        session_id: Option<&str>,
        task_type: Option<&str>,
    ) -> Result<Vec<ProceduralHabit>> {
        let session_id = session_id.map(str::to_string);
        let task_type = task_type.map(str::to_string);
        self.with_conn(move |conn| {
            let mut filters = Vec::new();
            let mut bind: Vec<String> = Vec::new();
            if let Some(session) = &session_id {
                filters.push(format!("session_id = ?{}", bind.len() + 1));
                bind.push(session.clone());
            }
            if let Some(task) = &task_type {
                filters.push(format!("task_type = ?{}", bind.len() + 1));
                bind.push(task.clone());
            }
            let where_clause = if filters.is_empty() {
                String::new()
            } else {
                format!(" WHERE {}", filters.join(" AND "))
            };
            let sql =
                format!("SELECT * FROM procedural_habits{where_clause} ORDER BY updated_at DESC");
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(rusqlite::params_from_iter(bind.iter()), row_to_habit)?;
            rows.collect()
        })
        .await
    }
}

fn trim(conn: &Connection, table: &str, pk: &str, max_records: usize) -> rusqlite::Result<()> {
    if max_records == 0 {
        return Ok(());
    }
    conn.execute(
        &format!(
            "DELETE FROM {table} WHERE {pk} NOT IN (
                SELECT {pk} FROM {table} ORDER BY updated_at DESC LIMIT {max_records}
            )"
        ),
        [],
    )?;
    Ok(())
}

fn to_ts(at: chrono::DateTime<Utc>) -> f64 {
    at.timestamp_millis() as f64 / 1000.0
}

fn from_ts(raw: f64) -> chrono::DateTime<Utc> {
    Utc.timestamp_millis_opt((raw * 1000.0) as i64)
        .single()
        .unwrap_or_else(Utc::now)
}

fn row_to_profile(row: &rusqlite::Row<'_>) -> rusqlite::Result<CoreProfile> {
    let updated_at: f64 = row.get("updated_at")?;
    Ok(CoreProfile {
        profile_id: row.get("profile_id")?,
        summary: row.get("summary")?,
        session_id: row.get("session_id")?,
        updated_at: from_ts(updated_at),
    })
}

fn row_to_fact(row: &rusqlite::Row<'_>) -> rusqlite::Result<SemanticFact> {
    let updated_at: f64 = row.get("updated_at")?;
    Ok(SemanticFact {
        fact_id: row.get("fact_id")?,
        session_id: row.get("session_id")?,
        subject: row.get("subject")?,
        predicate: row.get("predicate")?,
        object: row.get("object_value")?,
        updated_at: from_ts(updated_at),
    })
}

fn row_to_habit(row: &rusqlite::Row<'_>) -> rusqlite::Result<ProceduralHabit> {
    let updated_at: f64 = row.get("updated_at")?;
    Ok(ProceduralHabit {
        habit_id: row.get("habit_id")?,
        session_id: row.get("session_id")?,
        task_type: row.get("task_type")?,
        instruction: row.get("instruction")?,
        updated_at: from_ts(updated_at),
    })
}

fn sql_err(e: rusqlite::Error) -> Error {
    Error::Other(format!("sqlite: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fact_upsert_replaces_object_on_conflict() {
        let store = SqliteSemanticFacts::open_in_memory(100).unwrap();
        store
            .upsert_fact("f1", "s1", "user", "likes", "tea")
            .await
            .unwrap();
        let updated = store
            .upsert_fact("f2", "s1", "user", "likes", "coffee")
            .await
            .unwrap();
        // The original row survives with the new object.
        assert_eq!(updated.fact_id, "f1");
        assert_eq!(updated.object, "coffee");

        let facts = store.list_facts(Some("s1"), None).await.unwrap();
        assert_eq!(facts.len(), 1);
        assert_eq!(facts[0].object, "coffee");
    }

    #[tokio::test]
    async fn habits_unique_on_triple_key() {
        let store = SqliteProceduralHabits::open_in_memory(100).unwrap();
        store
            .record_habit("h1", "s1", "coding", "write tests first")
            .await
            .unwrap();
        store
            .record_habit("h2", "s1", "coding", "write tests first")
            .await
            .unwrap();
        store
            .record_habit("h3", "s1", "coding", "run the linter")
            .await
            .unwrap();

        let habits = store.list_habits(Some("s1"), Some("coding")).await.unwrap();
        assert_eq!(habits.len(), 2);
    }

    #[tokio::test]
    async fn profiles_upsert_by_id_and_list_desc() {
        let store = SqliteCoreProfiles::open_in_memory(100).unwrap();
        store
            .upsert_profile("p1", "likes rust", Some("s1"))
            .await
            .unwrap();
        store
            .upsert_profile("p1", "likes rust and sqlite", Some("s1"))
            .await
            .unwrap();

        let profiles = store.list_profiles(Some("s1")).await.unwrap();
        assert_eq!(profiles.len(), 1);
        assert_eq!(profiles[0].summary, "likes rust and sqlite");
        assert!(store.get_profile("p1").await.unwrap().is_some());
        assert!(store.get_profile("p2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn trim_keeps_most_recent() {
        let store = SqliteCoreProfiles::open_in_memory(2).unwrap();
        for i in 0..4 {
            store
                .upsert_profile(&format!("p{i}"), "summary", None)
                .await
                .unwrap();
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        let profiles = store.list_profiles(None).await.unwrap();
        assert_eq!(profiles.len(), 2);
        assert_eq!(profiles[0].profile_id, "p3");
    }
}
