//! Event-driven memory engine with hybrid retrieval.
//!
//! The write path persists, indexes, and extracts; the read path (in
//! `engine_recall`) fuses retrievers with RRF, rescans, reranks, and
//! backfills. `memory.recorded` is emitted only after the record is fully
//! persisted and indexed.

use std::sync::Arc;

use chrono::{Duration, Utc};
use serde_json::Map;

use cerise_domain::config::MemoryConfig;
use cerise_domain::error::{Error, Result};
use cerise_events::{contracts, Event, MessageBus};
use cerise_providers::ProviderRegistry;
use cerise_state::StateStore;

use crate::compression::{MemoryCompressor, ProviderSummarizer};
use crate::kg;
use crate::kg_store::SqliteKgStore;
use crate::retrieval::{Bm25Retriever, KgRetriever, Retriever, VectorRetriever};
use crate::scorers::{default_scorers, MemoryScorer};
use crate::sqlite_store::SqliteMemoryStore;
use crate::store::{InMemoryStore, MemoryStore, StateMemoryStore};
use crate::types::MemoryRecord;
use crate::vector::{Embedder, HashEmbedder, InMemoryVectorIndex, ProviderEmbedder, VectorIndex};

/// Pre-built components for a [`MemoryEngine`]. `from_config` fills these
/// from configuration; tests and custom wirings construct them directly.
pub struct MemoryEngineParts {
    pub config: MemoryConfig,
    pub store: Arc<dyn MemoryStore>,
    pub scorers: Vec<Box<dyn MemoryScorer>>,
    pub embedder: Option<Arc<dyn Embedder>>,
    pub vector_index: Option<Arc<dyn VectorIndex>>,
    pub kg_store: Option<Arc<SqliteKgStore>>,
    pub compressor: Option<MemoryCompressor>,
    pub bus: Option<Arc<MessageBus>>,
    pub providers: Option<Arc<ProviderRegistry>>,
}

pub struct MemoryEngine {
    pub(crate) config: MemoryConfig,
    pub(crate) store: Arc<dyn MemoryStore>,
    pub(crate) scorers: Vec<Box<dyn MemoryScorer>>,
    pub(crate) embedder: Option<Arc<dyn Embedder>>,
    pub(crate) vector_index: Option<Arc<dyn VectorIndex>>,
    pub(crate) kg_store: Option<Arc<SqliteKgStore>>,
    pub(crate) compressor: Option<MemoryCompressor>,
    pub(crate) bus: Option<Arc<MessageBus>>,
    pub(crate) providers: Option<Arc<ProviderRegistry>>,
    pub(crate) retrievers: Vec<Box<dyn Retriever>>,
}

impl MemoryEngine {
    pub fn new(parts: MemoryEngineParts) -> Self {
        let mut engine = Self {
            config: parts.config,
            store: parts.store,
            scorers: parts.scorers,
            embedder: parts.embedder,
            vector_index: parts.vector_index,
            kg_store: parts.kg_store,
            compressor: parts.compressor,
            bus: parts.bus,
            providers: parts.providers,
            retrievers: Vec::new(),
        };
        engine.retrievers = engine.build_retrievers();
        engine
    }

    /// Build the engine from configuration: store backend, embedder, vector
    /// index, KG store, compressor, and default scorers.
    pub fn from_config(
        config: MemoryConfig,
        providers: Option<Arc<ProviderRegistry>>,
        bus: Option<Arc<MessageBus>>,
    ) -> Result<Self> {
        let store = build_store(&config)?;
        let embedder = build_embedder(&config, providers.as_ref());
        let vector_index: Option<Arc<dyn VectorIndex>> = config
            .vector
            .enabled
            .then(|| {
                Arc::new(InMemoryVectorIndex::new(config.vector.embedding_dim))
                    as Arc<dyn VectorIndex>
            });
        let kg_store = build_kg_store(&config)?;
        let compressor = build_compressor(&config, providers.as_ref());
        let scorers = default_scorers(&config.scoring);

        Ok(Self::new(MemoryEngineParts {
            config,
            store,
            scorers,
            embedder,
            vector_index,
            kg_store,
            compressor,
            bus,
            providers,
        }))
    }

    pub fn store(&self) -> Arc<dyn MemoryStore> {
        Arc::clone(&self.store)
    }

    pub fn kg_store(&self) -> Option<Arc<SqliteKgStore>> {
        self.kg_store.as_ref().map(Arc::clone)
    }

    fn build_retrievers(&self) -> Vec<Box<dyn Retriever>> {
        let mut retrievers: Vec<Box<dyn Retriever>> = Vec::new();
        if self.config.sparse.enabled {
            retrievers.push(Box::new(Bm25Retriever {
                store: Arc::clone(&self.store),
            }));
        }
        if self.config.vector.enabled {
            if let (Some(index), Some(embedder)) = (&self.vector_index, &self.embedder) {
                retrievers.push(Box::new(VectorRetriever {
                    store: Arc::clone(&self.store),
                    index: Arc::clone(index),
                    embedder: Arc::clone(embedder),
                }));
            }
        }
        if self.config.kg.enabled {
            if let Some(kg_store) = &self.kg_store {
                retrievers.push(Box::new(KgRetriever {
                    store: Arc::clone(kg_store),
                }));
            }
        }
        retrievers
    }

    /// Warm the vector index from persisted records.
    pub async fn prepare(&self) -> Result<()> {
        let (Some(index), Some(embedder)) = (&self.vector_index, &self.embedder) else {
            return Ok(());
        };
        let records = self.store.list(None).await?;
        if records.is_empty() {
            return Ok(());
        }
        let texts: Vec<String> = records.iter().map(|r| r.content.clone()).collect();
        let ids: Vec<String> = records.iter().map(|r| r.id.clone()).collect();
        match embedder.embed(&texts).await {
            Ok(vectors) => index.add(&ids, &vectors)?,
            Err(e) => tracing::warn!(error = %e, "vector index warmup failed"),
        }
        Ok(())
    }

    /// Persist a record, index it, extract triples, enforce session caps,
    /// maybe compress, then announce it.
    pub async fn add_record(&self, record: MemoryRecord) -> Result<()> {
        let expires_at = (self.config.store.ttl_seconds > 0)
            .then(|| record.created_at + Duration::seconds(self.config.store.ttl_seconds));
        let session_id = record.session_id.clone();
        let record_id = record.id.clone();

        self.store.add(record.clone(), expires_at).await?;

        if let (Some(index), Some(embedder)) = (&self.vector_index, &self.embedder) {
            match embedder.embed(std::slice::from_ref(&record.content)).await {
                Ok(vectors) => {
                    if let Err(e) = index.add(std::slice::from_ref(&record.id), &vectors) {
                        tracing::error!(record_id = %record.id, error = %e, "vector indexing failed");
                    }
                }
                Err(e) => tracing::error!(record_id = %record.id, error = %e, "embedding failed"),
            }
        }

        if self.config.kg.auto_extract {
            if let Some(kg_store) = &self.kg_store {
                let triples = kg::extract_triples(&record.content);
                kg_store
                    .add_triples(&session_id, triples, Some(&record.id))
                    .await?;
            }
        }

        self.enforce_session_limits(&session_id).await?;
        self.maybe_compress(&session_id).await?;

        if let Some(bus) = &self.bus {
            bus.publish_sync(Event::new(
                contracts::MEMORY_RECORDED,
                contracts::build_memory_recorded(&record_id, &session_id),
                "memory_engine",
            ));
        }
        Ok(())
    }

    /// Record one conversation turn as a memory.
    pub async fn ingest_message(
        &self,
        session_id: &str,
        role: &str,
        content: &str,
        metadata: Option<Map<String, serde_json::Value>>,
    ) -> Result<MemoryRecord> {
        let record = MemoryRecord::new(session_id, role, content)
            .with_metadata(metadata.unwrap_or_default());
        self.add_record(record.clone()).await?;
        Ok(record)
    }

    pub(crate) async fn enforce_session_limits(&self, session_id: &str) -> Result<()> {
        let limit = self.config.store.max_records_per_session;
        if limit == 0 {
            return Ok(());
        }
        let count = self.store.count(Some(session_id)).await?;
        if count <= limit {
            return Ok(());
        }
        let records = self.store.list(Some(session_id)).await?;
        let overflow = records.len().saturating_sub(limit);
        if overflow == 0 {
            return Ok(());
        }
        let delete_ids: Vec<String> = records
            .iter()
            .take(overflow)
            .map(|record| record.id.clone())
            .collect();
        tracing::debug!(session_id, overflow, "evicting oldest session records");
        self.store.delete(&delete_ids).await
    }

    pub(crate) async fn maybe_compress(&self, session_id: &str) -> Result<()> {
        let Some(compressor) = &self.compressor else {
            return Ok(());
        };
        let count = self.store.count(Some(session_id)).await?;
        if !compressor.should_compress(count) {
            return Ok(());
        }
        let records = self.store.list(Some(session_id)).await?;
        let to_compress = compressor.select_records(&records);
        if to_compress.is_empty() {
            return Ok(());
        }
        let Some(summary) = compressor.compress(&to_compress).await else {
            return Ok(());
        };
        let delete_ids: Vec<String> = to_compress.iter().map(|r| r.id.clone()).collect();
        self.store.delete(&delete_ids).await?;
        self.store.add(summary, self.summary_expiry()).await?;
        tracing::info!(
            session_id,
            compressed = delete_ids.len(),
            "compressed session memories"
        );
        Ok(())
    }

    fn summary_expiry(&self) -> Option<chrono::DateTime<Utc>> {
        (self.config.store.ttl_seconds > 0)
            .then(|| Utc::now() + Duration::seconds(self.config.store.ttl_seconds))
    }
}

fn build_store(config: &MemoryConfig) -> Result<Arc<dyn MemoryStore>> {
    match config.store.backend.to_lowercase().as_str() {
        "state" => {
            let state = if config.store.state_path.is_empty() {
                StateStore::in_memory()
            } else {
                StateStore::new(&config.store.state_path)
            };
            Ok(Arc::new(StateMemoryStore::new(state)))
        }
        "memory" => Ok(Arc::new(InMemoryStore::new(
            config.store.max_records_per_session.max(1) * 5,
        ))),
        "sqlite" => {
            let store = if config.store.sqlite_path.is_empty() {
                tracing::warn!("no sqlite_path configured, using in-memory database");
                SqliteMemoryStore::open_in_memory()?
            } else {
                SqliteMemoryStore::open(&config.store.sqlite_path)?
            };
            Ok(Arc::new(store))
        }
        other => Err(Error::Config(format!("unknown memory backend: {other}"))),
    }
}

fn build_embedder(
    config: &MemoryConfig,
    providers: Option<&Arc<ProviderRegistry>>,
) -> Option<Arc<dyn Embedder>> {
    if !config.vector.enabled {
        return None;
    }
    match config.vector.embedding_backend.to_lowercase().as_str() {
        "provider" | "external" => match providers {
            Some(registry) => Some(Arc::new(ProviderEmbedder::new(
                Arc::clone(registry),
                (!config.vector.embedding_provider.is_empty())
                    .then(|| config.vector.embedding_provider.clone()),
                (!config.vector.embedding_model.is_empty())
                    .then(|| config.vector.embedding_model.clone()),
            ))),
            None => {
                tracing::warn!("provider embedder configured without a registry, using hash");
                Some(Arc::new(HashEmbedder::new(config.vector.embedding_dim)))
            }
        },
        "hash" => Some(Arc::new(HashEmbedder::new(config.vector.embedding_dim))),
        other => {
            tracing::warn!(backend = %other, "unknown embedding backend, using hash fallback");
            Some(Arc::new(HashEmbedder::new(config.vector.embedding_dim)))
        }
    }
}

fn build_kg_store(config: &MemoryConfig) -> Result<Option<Arc<SqliteKgStore>>> {
    if !config.kg.enabled {
        return Ok(None);
    }
    let store = if config.store.sqlite_path.is_empty() {
        SqliteKgStore::open_in_memory()?
    } else {
        SqliteKgStore::open(&config.store.sqlite_path)?
    };
    Ok(Some(Arc::new(store)))
}

fn build_compressor(
    config: &MemoryConfig,
    providers: Option<&Arc<ProviderRegistry>>,
) -> Option<MemoryCompressor> {
    if !config.compression.enabled {
        return None;
    }
    let summary_provider = (!config.compression.summary_provider_id.is_empty())
        .then(|| {
            providers.map(|registry| {
                Box::new(ProviderSummarizer::new(
                    Arc::clone(registry),
                    config.compression.summary_provider_id.clone(),
                    (!config.compression.summary_model.is_empty())
                        .then(|| config.compression.summary_model.clone()),
                    config.compression.summary_temperature,
                    config.compression.summary_max_tokens,
                )) as Box<dyn crate::compression::SummaryProvider>
            })
        })
        .flatten();
    Some(MemoryCompressor {
        threshold: config.compression.threshold,
        window: config.compression.window,
        max_chars: config.compression.max_chars,
        summary_provider,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn test_engine(config: MemoryConfig) -> MemoryEngine {
        let dim = config.vector.embedding_dim;
        MemoryEngine::new(MemoryEngineParts {
            store: Arc::new(InMemoryStore::new(1000)),
            scorers: default_scorers(&config.scoring),
            embedder: config
                .vector
                .enabled
                .then(|| Arc::new(HashEmbedder::new(dim)) as Arc<dyn Embedder>),
            vector_index: config
                .vector
                .enabled
                .then(|| Arc::new(InMemoryVectorIndex::new(dim)) as Arc<dyn VectorIndex>),
            kg_store: config
                .kg
                .enabled
                .then(|| Arc::new(SqliteKgStore::open_in_memory().unwrap())),
            compressor: build_compressor(&config, None),
            bus: None,
            providers: None,
            config,
        })
    }

    #[tokio::test]
    async fn add_record_persists_and_indexes() {
        let config = MemoryConfig::default();
        let engine = test_engine(config);
        let record = engine
            .ingest_message("s1", "user", "Alice likes coffee", None)
            .await
            .unwrap();

        assert!(engine.store.get(&record.id).await.unwrap().is_some());
        assert_eq!(engine.vector_index.as_ref().unwrap().len(), 1);
        // Auto-extracted triple is queryable.
        let triples = engine
            .kg_store
            .as_ref()
            .unwrap()
            .search("coffee", Some("s1"), 5)
            .await
            .unwrap();
        assert!(!triples.is_empty());
        assert_eq!(triples[0].memory_id.as_deref(), Some(record.id.as_str()));
    }

    #[tokio::test]
    async fn session_cap_evicts_oldest() {
        let mut config = MemoryConfig::default();
        config.store.max_records_per_session = 3;
        config.compression.enabled = false;
        let engine = test_engine(config);

        for i in 0..5 {
            engine
                .ingest_message("s1", "user", &format!("note {i}"), None)
                .await
                .unwrap();
        }
        let records = engine.store.list(Some("s1")).await.unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].content, "note 2");
    }

    #[tokio::test]
    async fn compression_replaces_window_with_summary() {
        let mut config = MemoryConfig::default();
        config.store.max_records_per_session = 100;
        config.compression.threshold = 6;
        config.compression.window = 4;
        config.kg.enabled = false;
        config.vector.enabled = false;
        let engine = test_engine(config);

        for i in 0..6 {
            engine
                .ingest_message("s1", "user", &format!("memory {i}"), None)
                .await
                .unwrap();
        }

        let records = engine.store.list(Some("s1")).await.unwrap();
        // 6 records hit the threshold: 4 compressed into 1 summary + 2 left.
        assert_eq!(records.len(), 3);
        let summary = records.iter().find(|r| r.is_summary()).unwrap();
        assert_eq!(summary.metadata["source_count"], 4);
        let source_ids = summary.metadata["source_ids"].as_array().unwrap();
        for id in source_ids {
            let id = id.as_str().unwrap();
            assert!(engine.store.get(id).await.unwrap().is_none());
        }
    }
}
