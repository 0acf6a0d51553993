//! StateStore backends for the layer stores.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;

use cerise_domain::error::Result;
use cerise_state::StateStore;

use crate::layers::{CoreProfileLayer, ProceduralHabitsLayer, SemanticFactsLayer};
use crate::types::{CoreProfile, ProceduralHabit, SemanticFact};

macro_rules! state_layer {
    ($name:ident, $key:expr) => {
        pub struct $name {
            store: StateStore,
            max_records: usize,
        }

        impl $name {
            pub fn new(store: StateStore, max_records: usize) -> Self {
                Self { store, max_records }
            }

            async fn load(&self) -> Vec<Value> {
                self.store
                    .get($key)
                    .await
                    .and_then(|v| v.as_array().cloned())
                    .unwrap_or_default()
            }

            async fn save(&self, mut entries: Vec<Value>) -> Result<()> {
                if self.max_records > 0 && entries.len() > self.max_records {
                    let excess = entries.len() - self.max_records;
                    entries.drain(..excess);
                }
                self.store.set($key, Value::Array(entries)).await
            }
        }
    };
}

state_layer!(StateCoreProfiles, "memory.layers.core_profiles");
state_layer!(StateSemanticFacts, "memory.layers.semantic_facts");
state_layer!(StateProceduralHabits, "memory.layers.procedural_habits");

#[async_trait]
impl CoreProfileLayer for StateCoreProfiles {
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
        let mut entries = self.load().await;
        entries.retain(|entry| {
            entry.get("profile_id").and_then(Value::as_str) != Some(profile_id)
        });
        entries.push(serde_json::to_value(&profile)?);
        self.save(entries).await?;
        Ok(profile)
    }

    async fn get_profile(&self, profile_id: &str) -> Result<Option<CoreProfile>> {
        Ok(self
            .load()
            .await
            .iter()
            .find(|entry| entry.get("profile_id").and_then(Value::as_str) == Some(profile_id))
            .and_then(|entry| serde_json::from_value(entry.clone()).ok()))
    }

    async fn list_profiles(&self, session_id: Option<&str>) -> Result<Vec<CoreProfile>> {
        let mut profiles: Vec<CoreProfile> = self
            .load()
            .await
            .into_iter()
            .filter_map(|entry| serde_json::from_value(entry).ok())
            .filter(|profile: &CoreProfile| {
                session_id
                    .map(|s| profile.session_id.as_deref() == Some(s))
                    .unwrap_or(true)
            })
            .collect();
        profiles.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(profiles)
    }
}

#[async_trait]
impl SemanticFactsLayer for StateSemanticFacts {
    async fn upsert_fact(
        &self,
        fact_id: &str,
        session_id: &str,
        subject: &str,
        predicate: &str,
        object: &str,
    ) -> Result<SemanticFact> {
        let mut entries = self.load().await;
        // Unique (session_id, subject, predicate): keep the original id.
        let existing_id = entries
            .iter()
            .find(|entry| {
                entry.get("session_id").and_then(Value::as_str) == Some(session_id)
                    && entry.get("subject").and_then(Value::as_str) == Some(subject)
                    && entry.get("predicate").and_then(Value::as_str) == Some(predicate)
            })
            .and_then(|entry| entry.get("fact_id").and_then(Value::as_str))
            .map(str::to_string);
        entries.retain(|entry| {
            !(entry.get("session_id").and_then(Value::as_str) == Some(session_id)
                && entry.get("subject").and_then(Value::as_str) == Some(subject)
                && entry.get("predicate").and_then(Value::as_str) == Some(predicate))
        });
        let fact = SemanticFact {
            fact_id: existing_id.unwrap_or_else(|| fact_id.to_string()),
            session_id: session_id.to_string(),
            subject: subject.to_string(),
            predicate: predicate.to_string(),
            object: object.to_string(),
            updated_at: Utc::now(),
        };
        entries.push(serde_json::to_value(&fact)?);
        self.save(entries).await?;
        Ok(fact)
    }

    async fn list_facts(
        &self,
        session_id: Option<&str>,
        subject: Option<&str>,
    ) -> Result<Vec<SemanticFact>> {
        let mut facts: Vec<SemanticFact> = self
            .load()
            .await
            .into_iter()
            .filter_map(|entry| serde_json::from_value(entry).ok())
            .filter(|fact: &SemanticFact| {
                session_id.map(|s| fact.session_id == s).unwrap_or(true)
                    && subject.map(|s| fact.subject == s).unwrap_or(true)
            })
            .collect();
        facts.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(facts)
    }
}

#[async_trait]
impl ProceduralHabitsLayer for StateProceduralHabits {
    async fn record_habit(
        &self,
        habit_id: &str,
        session_id: &str,
        task_type: &str,
        instruction: &str,
    ) -> Result<ProceduralHabit> {
        let mut entries = self.load().await;
        entries.retain(|entry| {
            !(entry.get("session_id").and_then(Value::as_str) == Some(session_id)
                && entry.get("task_type").and_then(Value::as_str) == Some(task_type)
                && entry.get("instruction").and_then(Value::as_str) == Some(instruction))
        });
        let habit = ProceduralHabit {
            habit_id: habit_id.to_string(),
            session_id: session_id.to_string(),
            task_type: task_type.to_string(),
            instruction: instruction.to_string(),
            updated_at: Utc::now(),
        };
        entries.push(serde_json::to_value(&habit)?);
        self.save(entries).await?;
        Ok(habit)
    }

    async fn list_habits(
        &self,
        session_id: Option<&str>,
        task_type: Option<&str>,
    ) -> Result<Vec<ProceduralHabit>> {
        let mut habits: Vec<ProceduralHabit> = self
            .load()
            .await
            .into_iter()
            .filter_map(|entry| serde_json::from_value(entry).ok())
            .filter(|habit: &ProceduralHabit| {
                session_id.map(|s| habit.session_id == s).unwrap_or(true)
                    && task_type.map(|t| habit.task_type == t).unwrap_or(true)
            })
            .collect();
        habits.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(habits)
    }
}
