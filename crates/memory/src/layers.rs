//! Layered memory stores: core profiles, semantic facts, procedural habits.
//!
//! Each layer has a SQLite backend (one file per layer) and a
//! state-store backend sharing the same trait, selected by config.

use std::sync::Arc;

use async_trait::async_trait;

use cerise_domain::config::MemoryLayerStoreConfig;
use cerise_domain::error::Result;
use cerise_state::StateStore;

use crate::layers_sqlite::{SqliteCoreProfiles, SqliteProceduralHabits, SqliteSemanticFacts};
use crate::layers_state::{StateCoreProfiles, StateProceduralHabits, StateSemanticFacts};
use crate::types::{CoreProfile, ProceduralHabit, SemanticFact};

#[async_trait]
pub trait CoreProfileLayer: Send + Sync {
    async fn upsert_profile(
        &self,
        profile_id: &str,
        summary: &str,
        session_id: Option<&str>,
    ) -> Result<CoreProfile>;

    async fn get_profile(&self, profile_id: &str) -> Result<Option<CoreProfile>>;

    /// Profiles ordered by `updated_at` descending.
    async fn list_profiles(&self, session_id: Option<&str>) -> Result<Vec<CoreProfile>>;
}

#[async_trait]
pub trait SemanticFactsLayer: Send + Sync {
    /// Upsert on the unique `(session_id, subject, predicate)` key: a
    /// conflict replaces the object and bumps `updated_at`.
    async fn upsert_fact(
        &self,
        fact_id: &str,
        session_id: &str,
        subject: &str,
        predicate: &str,
        object: &str,
    ) -> Result<SemanticFact>;

    async fn list_facts(
        &self,
        session_id: Option<&str>,
        subject: Option<&str>,
    ) -> Result<Vec<SemanticFact>>;
}

#[async_trait]
pub trait ProceduralHabitsLayer: Send + Sync {
    /// Record a habit; `(session_id, task_type, instruction)` is unique.
    async fn record_habit(
        &self,
        habit_id: &str,
        session_id: &str,
        task_type: &str,
        instruction: &str,
    ) -> Result<ProceduralHabit>;

    async fn list_habits(
        &self,
        session_id: Option<&str>,
        task_type: Option<&str>,
    ) -> Result<Vec<ProceduralHabit>>;
}

pub fn build_core_profile_layer(
    config: &MemoryLayerStoreConfig,
) -> Result<Option<Arc<dyn CoreProfileLayer>>> {
    if !config.enabled {
        return Ok(None);
    }
    let layer: Arc<dyn CoreProfileLayer> = match config.backend.to_lowercase().as_str() {
        "state" => Arc::new(StateCoreProfiles::new(
            state_store(&config.state_path),
            config.max_records,
        )),
        "memory" => Arc::new(StateCoreProfiles::new(
            StateStore::in_memory(),
            config.max_records,
        )),
        _ => {
            if config.sqlite_path.is_empty() {
                Arc::new(SqliteCoreProfiles::open_in_memory(config.max_records)?)
            } else {
                Arc::new(SqliteCoreProfiles::open(&config.sqlite_path, config.max_records)?)
            }
        }
    };
    Ok(Some(layer))
}

pub fn build_semantic_facts_layer(
    config: &MemoryLayerStoreConfig,
) -> Result<Option<Arc<dyn SemanticFactsLayer>>> {
    if !config.enabled {
        return Ok(None);
    }
    let layer: Arc<dyn SemanticFactsLayer> = match config.backend.to_lowercase().as_str() {
        "state" => Arc::new(StateSemanticFacts::new(
            state_store(&config.state_path),
            config.max_records,
        )),
        "memory" => Arc::new(StateSemanticFacts::new(
            StateStore::in_memory(),
            config.max_records,
        )),
        _ => {
            if config.sqlite_path.is_empty() {
                Arc::new(SqliteSemanticFacts::open_in_memory(config.max_records)?)
            } else {
                Arc::new(SqliteSemanticFacts::open(&config.sqlite_path, config.max_records)?)
            }
        }
    };
    Ok(Some(layer))
}

pub fn build_procedural_habits_layer(
    config: &MemoryLayerStoreConfig,
) -> Result<Option<Arc<dyn ProceduralHabitsLayer>>> {
    if !config.enabled {
        return Ok(None);
    }
    let layer: Arc<dyn ProceduralHabitsLayer> = match config.backend.to_lowercase().as_str() {
        "state" => Arc::new(StateProceduralHabits::new(
            state_store(&config.state_path),
            config.max_records,
        )),
        "memory" => Arc::new(StateProceduralHabits::new(
            StateStore::in_memory(),
            config.max_records,
        )),
        _ => {
            if config.sqlite_path.is_empty() {
                Arc::new(SqliteProceduralHabits::open_in_memory(config.max_records)?)
            } else {
                Arc::new(SqliteProceduralHabits::open(
                    &config.sqlite_path,
                    config.max_records,
                )?)
            }
        }
    };
    Ok(Some(layer))
}

fn state_store(path: &str) -> StateStore {
    if path.is_empty() {
        StateStore::in_memory()
    } else {
        StateStore::new(path)
    }
}
