//! Memory recall: fusion, filtering, rescoring, rerank, random recall, and
//! recency backfill.

use rand::Rng;

use cerise_domain::error::Result;
use cerise_providers::CapabilityKind;

use crate::engine::MemoryEngine;
use crate::retrieval::rrf_fuse;
use crate::scorers::emotion_intensity;
use crate::types::{MemoryRecord, MemoryResult};
use crate::vector::cosine_similarity;

impl MemoryEngine {
    /// Hybrid recall over the enabled retrievers.
    pub async fn recall(
        &self,
        query: &str,
        limit: usize,
        session_id: Option<&str>,
    ) -> Result<Vec<MemoryResult>> {
        if !self.config.recall.enabled || limit == 0 {
            return Ok(Vec::new());
        }

        let mut ranked_lists = Vec::with_capacity(self.retrievers.len());
        for retriever in &self.retrievers {
            let top_k = self.retriever_top_k(retriever.name());
            match retriever.retrieve(query, session_id, top_k).await {
                Ok(results) => ranked_lists.push(results),
                Err(e) => {
                    tracing::error!(retriever = retriever.name(), error = %e, "retriever failed");
                    ranked_lists.push(Vec::new());
                }
            }
        }
        let mut fused = rrf_fuse(&ranked_lists, self.config.recall.rrf_k);

        if self.config.association.enabled && self.kg_store.is_some() {
            let assoc = self.associative_recall(query, &fused, session_id).await?;
            if !assoc.is_empty() {
                fused = rrf_fuse(&[fused, assoc], self.config.recall.rrf_k);
            }
        }

        let mut min_score = self.config.recall.min_score;
        if self.config.association.enabled {
            min_score = min_score.min(self.config.association.min_score);
        }
        let filtered = self.filter_results(fused, min_score);
        let filtered = if self.config.scoring.emotion_filter_enabled {
            self.filter_by_emotion(filtered, self.config.scoring.emotion_min_intensity)
        } else {
            filtered
        };
        let rescored = self.apply_scorers(query, filtered);
        let mut reranked = self.rerank_results(query, rescored).await;
        reranked.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        let reranked = self.maybe_random_recall(query, reranked, session_id).await?;
        let filled = self.fill_with_recent(reranked, limit, session_id).await?;
        let results: Vec<MemoryResult> = filled.into_iter().take(limit).collect();

        if self.config.recall.touch_on_recall {
            self.touch_results(&results).await;
        }
        Ok(results)
    }

    /// Format recall results for prompt injection.
    pub fn format_context(&self, results: &[MemoryResult]) -> String {
        if results.is_empty() {
            return String::new();
        }
        let mut lines = vec!["[Memory Recall]".to_string()];
        for (idx, item) in results.iter().enumerate() {
            let record = &item.record;
            let content = squeeze(&record.content, 200);
            let timestamp = record.created_at.format("%Y-%m-%d %H:%M");
            lines.push(format!(
                "{}. ({} @ {timestamp}) {content}",
                idx + 1,
                record.role
            ));
        }
        lines.join("\n")
    }

    fn retriever_top_k(&self, name: &str) -> usize {
        match name {
            "vector" => self.config.vector.top_k,
            "bm25" => self.config.sparse.top_k,
            "kg" => self.config.kg.top_k,
            _ => self.config.recall.top_k,
        }
    }

    /// Drop low scores, then dedupe by record id and by normalized content.
    pub(crate) fn filter_results(
        &self,
        results: Vec<MemoryResult>,
        min_score: f64,
    ) -> Vec<MemoryResult> {
        let mut seen_ids = std::collections::HashSet::new();
        let mut seen_content = std::collections::HashSet::new();
        results
            .into_iter()
            .filter(|item| item.score >= min_score)
            .filter(|item| seen_ids.insert(item.record.id.clone()))
            .filter(|item| seen_content.insert(item.record.content.trim().to_lowercase()))
            .collect()
    }

    pub(crate) fn filter_by_emotion(
        &self,
        results: Vec<MemoryResult>,
        min_intensity: f64,
    ) -> Vec<MemoryResult> {
        if min_intensity <= 0.0 {
            return results;
        }
        results
            .into_iter()
            .filter(|item| emotion_passes(&item.record, min_intensity))
            .collect()
    }

    /// Add the mean of the scorer bonuses to each fused score.
    pub(crate) fn apply_scorers(&self, query: &str, results: Vec<MemoryResult>) -> Vec<MemoryResult> {
        if self.scorers.is_empty() {
            return results;
        }
        let scorer_count = self.scorers.len() as f64;
        results
            .into_iter()
            .map(|item| {
                let bonus: f64 = self
                    .scorers
                    .iter()
                    .map(|scorer| scorer.score(query, &item.record))
                    .sum();
                MemoryResult {
                    score: item.score + bonus / scorer_count,
                    record: item.record,
                }
            })
            .collect()
    }

    /// Rerank the head of the list via a provider with rerank capability, or
    /// via embedding cosine similarity; blend into the existing scores.
    pub(crate) async fn rerank_results(
        &self,
        query: &str,
        results: Vec<MemoryResult>,
    ) -> Vec<MemoryResult> {
        if !self.config.rerank.enabled || results.is_empty() || self.config.rerank.top_k == 0 {
            return results;
        }
        let top_k = self.config.rerank.top_k.min(results.len());
        let mut candidates = results;
        let tail = candidates.split_off(top_k);

        let mut scores = self.rerank_with_provider(query, &candidates).await;
        if scores.is_empty() {
            scores = self.rerank_with_embeddings(query, &candidates).await;
        }
        if scores.is_empty() {
            candidates.extend(tail);
            return candidates;
        }

        let weight = self.config.rerank.weight;
        let mut merged: Vec<MemoryResult> = candidates
            .into_iter()
            .zip(scores)
            .map(|(item, rerank_score)| MemoryResult {
                score: (1.0 - weight) * item.score + weight * rerank_score,
                record: item.record,
            })
            .collect();
        merged.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        merged.extend(tail);
        merged
    }

    async fn rerank_with_provider(&self, query: &str, candidates: &[MemoryResult]) -> Vec<f64> {
        let Some(registry) = &self.providers else {
            return Vec::new();
        };
        let provider = if self.config.rerank.provider_id.is_empty() {
            registry.find_with_capability(CapabilityKind::Rerank)
        } else {
            registry.get(&self.config.rerank.provider_id)
        };
        let Some(provider) = provider else {
            return Vec::new();
        };
        if !provider.capabilities().rerank {
            return Vec::new();
        }
        let documents: Vec<String> = candidates
            .iter()
            .map(|item| item.record.content.clone())
            .collect();
        let model = (!self.config.rerank.model.is_empty()).then(|| self.config.rerank.model.clone());
        match provider
            .rerank(query.to_string(), documents.clone(), model, Some(documents.len()))
            .await
        {
            Ok(pairs) => {
                let mut scores = vec![0.0f64; candidates.len()];
                for (index, score) in pairs {
                    if index < scores.len() {
                        scores[index] = f64::from(score);
                    }
                }
                scores
            }
            Err(e) => {
                tracing::error!(error = %e, "provider rerank failed");
                Vec::new()
            }
        }
    }

    async fn rerank_with_embeddings(&self, query: &str, candidates: &[MemoryResult]) -> Vec<f64> {
        let Some(embedder) = &self.embedder else {
            return Vec::new();
        };
        let mut texts = vec![query.to_string()];
        texts.extend(candidates.iter().map(|item| item.record.content.clone()));
        let vectors = match embedder.embed(&texts).await {
            Ok(vectors) if vectors.len() == texts.len() => vectors,
            Ok(_) => return Vec::new(),
            Err(e) => {
                tracing::error!(error = %e, "embedding rerank failed");
                return Vec::new();
            }
        };
        let query_vec = &vectors[0];
        vectors[1..]
            .iter()
            .map(|vec| cosine_similarity(query_vec, vec))
            .collect()
    }

    /// Inject a random sample of session memories when a trigger keyword
    /// matches or the dice roll passes.
    pub(crate) async fn maybe_random_recall(
        &self,
        query: &str,
        results: Vec<MemoryResult>,
        session_id: Option<&str>,
    ) -> Result<Vec<MemoryResult>> {
        let cfg = &self.config.recall;
        if !cfg.random_enabled || cfg.random_k == 0 {
            return Ok(results);
        }
        let lowered = query.to_lowercase();
        let triggered = cfg
            .trigger_keywords
            .iter()
            .any(|keyword| lowered.contains(&keyword.to_lowercase()));
        if !triggered && rand::thread_rng().gen::<f64>() > cfg.random_probability {
            return Ok(results);
        }
        let random_results = self.random_recall(session_id, cfg.random_k).await?;
        if random_results.is_empty() {
            return Ok(results);
        }
        let mut fused = rrf_fuse(&[results, random_results], cfg.rrf_k);
        fused.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        Ok(fused)
    }

    async fn random_recall(&self, session_id: Option<&str>, k: usize) -> Result<Vec<MemoryResult>> {
        let records = self.store.list(session_id).await?;
        if records.is_empty() {
            return Ok(Vec::new());
        }
        use rand::seq::SliceRandom;
        let sampled: Vec<MemoryRecord> = records
            .choose_multiple(&mut rand::thread_rng(), k.min(records.len()))
            .cloned()
            .collect();
        Ok(sampled
            .into_iter()
            .map(|record| MemoryResult { record, score: 0.01 })
            .collect())
    }

    /// Pad with the most recent session records at a floor score.
    pub(crate) async fn fill_with_recent(
        &self,
        mut results: Vec<MemoryResult>,
        limit: usize,
        session_id: Option<&str>,
    ) -> Result<Vec<MemoryResult>> {
        if results.len() >= limit {
            return Ok(results);
        }
        let mut records = self.store.list(session_id).await?;
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let min_intensity = self
            .config
            .scoring
            .emotion_filter_enabled
            .then_some(self.config.scoring.emotion_min_intensity);
        let mut seen: std::collections::HashSet<String> =
            results.iter().map(|item| item.record.id.clone()).collect();
        for record in records {
            if results.len() >= limit {
                break;
            }
            if !seen.insert(record.id.clone()) {
                continue;
            }
            if let Some(min) = min_intensity {
                if !emotion_passes(&record, min) {
                    continue;
                }
            }
            results.push(MemoryResult { record, score: 0.01 });
        }
        Ok(results)
    }

    async fn touch_results(&self, results: &[MemoryResult]) {
        let accessed_at = chrono::Utc::now();
        for item in results {
            if let Err(e) = self.store.touch(&item.record.id, accessed_at).await {
                tracing::debug!(record_id = %item.record.id, error = %e, "touch failed");
            }
        }
    }
}

/// Records without an emotion block pass; otherwise intensity must reach the
/// threshold.
fn emotion_passes(record: &MemoryRecord, min_intensity: f64) -> bool {
    if min_intensity <= 0.0 || record.emotion().is_none() {
        return true;
    }
    emotion_intensity(record) >= min_intensity
}

fn squeeze(text: &str, max: usize) -> String {
    let squeezed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if squeezed.chars().count() <= max {
        return squeezed;
    }
    let kept: String = squeezed.chars().take(max.saturating_sub(3)).collect();
    format!("{}...", kept.trim_end())
}

#[cfg(test)]
mod tests {
    use cerise_domain::config::MemoryConfig;

    use crate::engine::tests::test_engine;
    use crate::store::MemoryStore as _;

    #[tokio::test]
    async fn recall_limit_zero_is_empty() {
        let engine = test_engine(MemoryConfig::default());
        engine.ingest_message("s1", "user", "hello", None).await.unwrap();
        assert!(engine.recall("hello", 0, Some("s1")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn recall_finds_relevant_record() {
        let mut config = MemoryConfig::default();
        config.rerank.enabled = false;
        let engine = test_engine(config);
        engine
            .ingest_message("s1", "user", "hello world", None)
            .await
            .unwrap();
        engine
            .ingest_message("s1", "user", "unrelated topic entirely", None)
            .await
            .unwrap();

        let results = engine.recall("hello", 1, Some("s1")).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].record.content, "hello world");
    }

    #[tokio::test]
    async fn empty_query_returns_backfill_only() {
        let mut config = MemoryConfig::default();
        config.recall.random_enabled = false;
        config.rerank.enabled = false;
        config.kg.enabled = false;
        config.vector.enabled = false;
        let engine = test_engine(config);
        engine.ingest_message("s1", "user", "first", None).await.unwrap();
        engine.ingest_message("s1", "user", "second", None).await.unwrap();

        let results = engine.recall("", 2, Some("s1")).await.unwrap();
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| (r.score - 0.01).abs() < 1e-9));
        // Backfill is most-recent-first.
        assert_eq!(results[0].record.content, "second");
    }

    #[tokio::test]
    async fn trigger_keyword_forces_random_recall() {
        let mut config = MemoryConfig::default();
        config.recall.random_enabled = true;
        config.recall.random_probability = 0.0;
        config.recall.trigger_keywords = vec!["random".into()];
        config.rerank.enabled = false;
        let engine = test_engine(config);

        let r1 = engine
            .ingest_message("s1", "user", "hello world", None)
            .await
            .unwrap();
        let r2 = engine
            .ingest_message("s1", "user", "unrelated", None)
            .await
            .unwrap();

        let results = engine.recall("random", 1, Some("s1")).await.unwrap();
        assert_eq!(results.len(), 1);
        let id = &results[0].record.id;
        assert!(id == &r1.id || id == &r2.id);
    }

    #[tokio::test]
    async fn touch_on_recall_updates_access_metadata() {
        let mut config = MemoryConfig::default();
        config.recall.touch_on_recall = true;
        config.rerank.enabled = false;
        let engine = test_engine(config);
        let record = engine
            .ingest_message("s1", "user", "hello world", None)
            .await
            .unwrap();

        let results = engine.recall("hello", 1, Some("s1")).await.unwrap();
        assert_eq!(results[0].record.id, record.id);

        let stored = engine.store().get(&record.id).await.unwrap().unwrap();
        assert_eq!(stored.access_count(), 1);
        assert!(stored.metadata.contains_key("last_accessed"));
    }

    #[tokio::test]
    async fn rerank_blends_scores() {
        let mut config = MemoryConfig::default();
        config.rerank.enabled = true;
        config.rerank.weight = 0.5;
        config.kg.enabled = false;
        let engine = test_engine(config);
        engine
            .ingest_message("s1", "user", "alpha beta gamma", None)
            .await
            .unwrap();
        engine
            .ingest_message("s1", "user", "alpha beta delta", None)
            .await
            .unwrap();

        // Embedding rerank path (hash embedder) must not error.
        let results = engine.recall("alpha beta", 2, Some("s1")).await.unwrap();
        assert_eq!(results.len(), 2);
        assert!(results[0].score >= results[1].score);
    }

    #[tokio::test]
    async fn duplicate_content_is_deduped() {
        let mut config = MemoryConfig::default();
        config.rerank.enabled = false;
        let engine = test_engine(config);
        engine
            .ingest_message("s1", "user", "same text", None)
            .await
            .unwrap();
        engine
            .ingest_message("s1", "user", "Same Text", None)
            .await
            .unwrap();

        let results = engine.recall("same text", 5, Some("s1")).await.unwrap();
        // One ranked hit; the near-duplicate only reappears via backfill.
        let ranked: Vec<_> = results.iter().filter(|r| r.score > 0.02).collect();
        assert_eq!(ranked.len(), 1);
    }
}
