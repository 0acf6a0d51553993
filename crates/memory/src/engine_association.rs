//! Associative recall: BFS expansion over the knowledge graph.

use cerise_domain::error::Result;

use crate::engine::MemoryEngine;
use crate::kg::extract_entities;
use crate::retrieval::triple_to_result;
use crate::types::{KgTriple, MemoryResult};

impl MemoryEngine {
    /// Walk the knowledge graph from entities in the query (and the top base
    /// results), up to `max_hops` levels, converting each hop's triples into
    /// scored results.
    pub(crate) async fn associative_recall(
        &self,
        query: &str,
        base_results: &[MemoryResult],
        session_id: Option<&str>,
    ) -> Result<Vec<MemoryResult>> {
        let Some(kg_store) = &self.kg_store else {
            return Ok(Vec::new());
        };
        let cfg = &self.config.association;
        if cfg.max_hops == 0 {
            return Ok(Vec::new());
        }
        let entities = self.gather_entities(query, base_results);
        if entities.is_empty() {
            return Ok(Vec::new());
        }

        let mut all_results = Vec::new();
        let mut seen: std::collections::HashSet<String> = entities.iter().cloned().collect();
        let mut hop_entities = entities;

        for _ in 0..cfg.max_hops {
            let triples = kg_store
                .search_related(&hop_entities, session_id, cfg.top_k)
                .await?;
            if triples.is_empty() {
                break;
            }
            let (hop_results, discovered) = self.triples_to_results(&triples).await?;
            all_results.extend(hop_results);

            let new_entities: Vec<String> = discovered
                .into_iter()
                .filter(|entity| seen.insert(entity.clone()))
                .collect();
            if new_entities.is_empty() {
                break;
            }
            hop_entities = new_entities.into_iter().take(cfg.max_entities).collect();
        }
        Ok(all_results)
    }

    fn gather_entities(&self, query: &str, base_results: &[MemoryResult]) -> Vec<String> {
        let cfg = &self.config.association;
        let mut entities = Vec::new();
        if cfg.expand_from_query {
            entities.extend(extract_entities(query, cfg.max_entities));
        }
        if cfg.expand_from_results {
            for item in base_results.iter().take(5) {
                if entities.len() >= cfg.max_entities {
                    break;
                }
                entities.extend(extract_entities(
                    &item.record.content,
                    cfg.max_entities - entities.len(),
                ));
            }
        }
        let mut seen = std::collections::HashSet::new();
        entities
            .into_iter()
            .filter(|entity| seen.insert(entity.clone()))
            .take(cfg.max_entities)
            .collect()
    }

    /// Each triple yields a scored pointer to its source memory (when it has
    /// one) and, when configured, a synthetic fact record. Returns the
    /// results plus the entities discovered for the next hop.
    async fn triples_to_results(
        &self,
        triples: &[KgTriple],
    ) -> Result<(Vec<MemoryResult>, Vec<String>)> {
        let include_facts = self.config.association.include_facts;
        let mut results = Vec::new();
        let mut entities = Vec::new();
        for triple in triples {
            if !triple.subject.is_empty() {
                entities.push(triple.subject.to_lowercase());
            }
            if !triple.object.is_empty() {
                entities.push(triple.object.to_lowercase());
            }
            if let Some(memory_id) = &triple.memory_id {
                if let Some(record) = self.store.get(memory_id).await? {
                    results.push(MemoryResult {
                        record,
                        score: triple.score + 0.2,
                    });
                }
            }
            if include_facts {
                results.push(triple_to_result(triple));
            }
        }
        Ok((results, entities))
    }
}

#[cfg(test)]
mod tests {
    use cerise_domain::config::MemoryConfig;

    use crate::engine::tests::test_engine;

    #[tokio::test]
    async fn associative_recall_surfaces_linked_memories() {
        let mut config = MemoryConfig::default();
        config.rerank.enabled = false;
        config.association.enabled = true;
        config.association.max_hops = 1;
        // Single-list RRF contributions sit below the default thresholds;
        // drop them so graph-only hits stay visible.
        config.recall.min_score = 0.0;
        config.association.min_score = 0.0;
        let engine = test_engine(config);

        // "Alice likes coffee" produces a triple linking alice -> coffee.
        let liked = engine
            .ingest_message("s1", "user", "Alice likes coffee", None)
            .await
            .unwrap();
        engine
            .ingest_message("s1", "user", "weather is nice today", None)
            .await
            .unwrap();

        // Query that mentions alice but not coffee still pulls the linked
        // record through the graph.
        let results = engine.recall("tell me about alice", 3, Some("s1")).await.unwrap();
        assert!(results.iter().any(|r| r.record.id == liked.id));
        // The synthetic fact record is present too.
        assert!(results
            .iter()
            .any(|r| r.record.content.starts_with("Fact: ")));
    }

    #[tokio::test]
    async fn hop_expansion_reaches_second_degree() {
        let mut config = MemoryConfig::default();
        config.rerank.enabled = false;
        config.association.max_hops = 2;
        config.association.include_facts = true;
        config.recall.min_score = 0.0;
        config.association.min_score = 0.0;
        let engine = test_engine(config);

        engine
            .ingest_message("s1", "user", "Alice likes coffee", None)
            .await
            .unwrap();
        engine
            .ingest_message("s1", "user", "coffee is bitter", None)
            .await
            .unwrap();

        let results = engine.recall("alice", 5, Some("s1")).await.unwrap();
        let facts: Vec<&str> = results
            .iter()
            .filter(|r| r.record.content.starts_with("Fact: "))
            .map(|r| r.record.content.as_str())
            .collect();
        // First hop reaches alice->coffee, second hop coffee->bitter.
        assert!(facts.iter().any(|f| f.contains("likes")));
        assert!(facts.iter().any(|f| f.contains("bitter")));
    }
}
