//! Memory extraction pipeline and layer event writer.
//!
//! The pipeline subscribes to `memory.recorded`, runs the configured
//! extractor, and emits layer events. The writer subscribes to those layer
//! events and persists them into the layer stores — components only couple
//! through event names.

use std::sync::Arc;

use serde_json::Value;

use cerise_domain::error::Result;
use cerise_events::{contracts, handler, Event, MessageBus};

use crate::extract::MemoryExtractor;
use crate::layers::{CoreProfileLayer, ProceduralHabitsLayer, SemanticFactsLayer};
use crate::store::MemoryStore;

/// Emits memory layer events from extracted updates.
pub struct MemoryPipeline {
    bus: Arc<MessageBus>,
    store: Arc<dyn MemoryStore>,
    extractor: Arc<dyn MemoryExtractor>,
}

impl MemoryPipeline {
    pub fn new(
        bus: Arc<MessageBus>,
        store: Arc<dyn MemoryStore>,
        extractor: Arc<dyn MemoryExtractor>,
    ) -> Arc<Self> {
        Arc::new(Self {
            bus,
            store,
            extractor,
        })
    }

    /// Subscribe to `memory.recorded`.
    pub fn attach(self: &Arc<Self>) -> Result<()> {
        let pipeline = Arc::clone(self);
        self.bus.subscribe(
            contracts::MEMORY_RECORDED,
            handler(move |event| {
                let pipeline = Arc::clone(&pipeline);
                async move { pipeline.handle_recorded(event).await }
            }),
        )?;
        Ok(())
    }

    async fn handle_recorded(&self, event: Event) -> Result<()> {
        let Some(record_id) = event.data.get("record_id").and_then(Value::as_str) else {
            return Ok(());
        };
        let Some(record) = self.store.get(record_id).await? else {
            return Ok(());
        };
        let extraction = self.extractor.extract(&record).await;
        self.emit_extraction(&extraction, Some(&record.session_id));

        if let Some(emotion) = record.emotion() {
            self.bus.publish_sync(Event::new(
                contracts::MEMORY_EMOTIONAL_SNAPSHOT_ATTACHED,
                contracts::build_memory_emotional_snapshot_attached(
                    &record.id,
                    &record.session_id,
                    emotion,
                ),
                "memory_pipeline",
            ));
        }
        Ok(())
    }

    /// Emit one event per extracted update. Facts and habits without a
    /// session are dropped (the layer keys require one).
    pub fn emit_extraction(
        &self,
        extraction: &crate::extract::MemoryExtraction,
        session_id: Option<&str>,
    ) {
        for update in &extraction.core_updates {
            let profile_id = update
                .profile_id
                .clone()
                .unwrap_or_else(|| format!("profile-{}", uuid::Uuid::new_v4()));
            self.bus.publish_sync(Event::new(
                contracts::MEMORY_CORE_UPDATED,
                contracts::build_memory_core_updated(
                    &profile_id,
                    &update.summary,
                    update.session_id.as_deref().or(session_id),
                ),
                "memory_pipeline",
            ));
        }

        for fact in &extraction.facts {
            let Some(session) = fact.session_id.as_deref().or(session_id) else {
                continue;
            };
            let fact_id = fact
                .fact_id
                .clone()
                .unwrap_or_else(|| format!("fact-{}", uuid::Uuid::new_v4()));
            self.bus.publish_sync(Event::new(
                contracts::MEMORY_FACT_UPSERTED,
                contracts::build_memory_fact_upserted(
                    &fact_id,
                    session,
                    &fact.subject,
                    &fact.predicate,
                    &fact.object,
                ),
                "memory_pipeline",
            ));
        }

        for habit in &extraction.habits {
            let Some(session) = habit.session_id.as_deref().or(session_id) else {
                continue;
            };
            let habit_id = habit
                .habit_id
                .clone()
                .unwrap_or_else(|| format!("habit-{}", uuid::Uuid::new_v4()));
            self.bus.publish_sync(Event::new(
                contracts::MEMORY_HABIT_RECORDED,
                contracts::build_memory_habit_recorded(
                    &habit_id,
                    session,
                    &habit.task_type,
                    &habit.instruction,
                ),
                "memory_pipeline",
            ));
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Layer writer
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Persists layer events into the layer stores.
pub struct LayerWriter {
    bus: Arc<MessageBus>,
    pub core_profiles: Option<Arc<dyn CoreProfileLayer>>,
    pub facts: Option<Arc<dyn SemanticFactsLayer>>,
    pub habits: Option<Arc<dyn ProceduralHabitsLayer>>,
}

impl LayerWriter {
    pub fn new(
        bus: Arc<MessageBus>,
        core_profiles: Option<Arc<dyn CoreProfileLayer>>,
        facts: Option<Arc<dyn SemanticFactsLayer>>,
        habits: Option<Arc<dyn ProceduralHabitsLayer>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            bus,
            core_profiles,
            facts,
            habits,
        })
    }

    pub fn attach(self: &Arc<Self>) -> Result<()> {
        if let Some(layer) = self.core_profiles.clone() {
            self.bus.subscribe(
                contracts::MEMORY_CORE_UPDATED,
                handler(move |event| {
                    let layer = Arc::clone(&layer);
                    async move {
                        let profile_id = str_field(&event, "profile_id");
                        let summary = str_field(&event, "summary");
                        let session_id = event.data.get("session_id").and_then(Value::as_str);
                        layer
                            .upsert_profile(&profile_id, &summary, session_id)
                            .await?;
                        Ok(())
                    }
                }),
            )?;
        }
        if let Some(layer) = self.facts.clone() {
            self.bus.subscribe(
                contracts::MEMORY_FACT_UPSERTED,
                handler(move |event| {
                    let layer = Arc::clone(&layer);
                    async move {
                        layer
                            .upsert_fact(
                                &str_field(&event, "fact_id"),
                                &str_field(&event, "session_id"),
                                &str_field(&event, "subject"),
                                &str_field(&event, "predicate"),
                                &str_field(&event, "object"),
                            )
                            .await?;
                        Ok(())
                    }
                }),
            )?;
        }
        if let Some(layer) = self.habits.clone() {
            self.bus.subscribe(
                contracts::MEMORY_HABIT_RECORDED,
                handler(move |event| {
                    let layer = Arc::clone(&layer);
                    async move {
                        layer
                            .record_habit(
                                &str_field(&event, "habit_id"),
                                &str_field(&event, "session_id"),
                                &str_field(&event, "task_type"),
                                &str_field(&event, "instruction"),
                            )
                            .await?;
                        Ok(())
                    }
                }),
            )?;
        }
        Ok(())
    }
}

fn str_field(event: &Event, key: &str) -> String {
    event
        .data
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::RuleBasedExtractor;
    use crate::types::MemoryRecord;
    use crate::layers_state::{StateCoreProfiles, StateProceduralHabits, StateSemanticFacts};
    use crate::store::InMemoryStore;
    use cerise_state::StateStore;

    async fn setup() -> (
        Arc<MessageBus>,
        Arc<InMemoryStore>,
        Arc<StateSemanticFacts>,
        Arc<StateCoreProfiles>,
        Arc<StateProceduralHabits>,
    ) {
        let bus = Arc::new(MessageBus::new());
        let store = Arc::new(InMemoryStore::new(100));
        let facts = Arc::new(StateSemanticFacts::new(StateStore::in_memory(), 100));
        let profiles = Arc::new(StateCoreProfiles::new(StateStore::in_memory(), 100));
        let habits = Arc::new(StateProceduralHabits::new(StateStore::in_memory(), 100));

        let pipeline = MemoryPipeline::new(
            Arc::clone(&bus),
            Arc::clone(&store) as Arc<dyn MemoryStore>,
            Arc::new(RuleBasedExtractor::new()),
        );
        pipeline.attach().unwrap();

        let writer = LayerWriter::new(
            Arc::clone(&bus),
            Some(Arc::clone(&profiles) as Arc<dyn CoreProfileLayer>),
            Some(Arc::clone(&facts) as Arc<dyn SemanticFactsLayer>),
            Some(Arc::clone(&habits) as Arc<dyn ProceduralHabitsLayer>),
        );
        writer.attach().unwrap();
        bus.start().await;
        (bus, store, facts, profiles, habits)
    }

    #[tokio::test]
    async fn recorded_event_flows_to_layer_stores() {
        let (bus, store, facts, profiles, habits) = setup().await;

        let record = MemoryRecord::new(
            "s1",
            "user",
            "core: loves rust\nfact: user | likes | coffee\nhabit: coding | tests first",
        );
        store.add(record.clone(), None).await.unwrap();
        bus.emit(
            contracts::MEMORY_RECORDED,
            contracts::build_memory_recorded(&record.id, "s1"),
            "test",
        )
        .await
        .unwrap();
        bus.wait_empty().await;

        assert_eq!(profiles.list_profiles(Some("s1")).await.unwrap().len(), 1);
        let stored_facts = facts.list_facts(Some("s1"), None).await.unwrap();
        assert_eq!(stored_facts.len(), 1);
        assert_eq!(stored_facts[0].object, "coffee");
        assert_eq!(habits.list_habits(Some("s1"), None).await.unwrap().len(), 1);
        bus.stop().await;
    }

    #[tokio::test]
    async fn emotion_block_emits_snapshot_event() {
        let (bus, store, _, _, _) = setup().await;
        let seen = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        {
            let seen = Arc::clone(&seen);
            bus.subscribe(
                contracts::MEMORY_EMOTIONAL_SNAPSHOT_ATTACHED,
                handler(move |_| {
                    let seen = Arc::clone(&seen);
                    async move {
                        seen.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                        Ok(())
                    }
                }),
            )
            .unwrap();
        }

        let mut record = MemoryRecord::new("s1", "user", "great news!");
        record.metadata.insert(
            "emotion".into(),
            serde_json::json!({ "intensity": 0.9 }),
        );
        store.add(record.clone(), None).await.unwrap();
        bus.emit(
            contracts::MEMORY_RECORDED,
            contracts::build_memory_recorded(&record.id, "s1"),
            "test",
        )
        .await
        .unwrap();
        bus.wait_empty().await;

        assert_eq!(seen.load(std::sync::atomic::Ordering::SeqCst), 1);
        bus.stop().await;
    }

    #[tokio::test]
    async fn missing_record_is_ignored() {
        let (bus, _, facts, _, _) = setup().await;
        bus.emit(
            contracts::MEMORY_RECORDED,
            contracts::build_memory_recorded("ghost", "s1"),
            "test",
        )
        .await
        .unwrap();
        bus.wait_empty().await;
        assert!(facts.list_facts(Some("s1"), None).await.unwrap().is_empty());
        bus.stop().await;
    }
}
