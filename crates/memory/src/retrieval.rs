//! Retrievers and Reciprocal Rank Fusion.

use std::sync::Arc;

use async_trait::async_trait;

use cerise_domain::error::Result;

use crate::kg_store::SqliteKgStore;
use crate::store::MemoryStore;
use crate::types::{MemoryRecord, MemoryResult};
use crate::vector::{Embedder, VectorIndex};

/// A retrieval channel feeding the fusion stage.
#[async_trait]
pub trait Retriever: Send + Sync {
    fn name(&self) -> &'static str;

    async fn retrieve(
        &self,
        query: &str,
        session_id: Option<&str>,
        top_k: usize,
    ) -> Result<Vec<MemoryResult>>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Sparse (BM25) retriever
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// BM25 retriever over the store's FTS index, with a keyword-overlap scan
/// fallback for stores without one.
pub struct Bm25Retriever {
    pub store: Arc<dyn MemoryStore>,
}

#[async_trait]
impl Retriever for Bm25Retriever {
    fn name(&self) -> &'static str {
        "bm25"
    }

    async fn retrieve(
        &self,
        query: &str,
        session_id: Option<&str>,
        top_k: usize,
    ) -> Result<Vec<MemoryResult>> {
        if top_k == 0 {
            return Ok(Vec::new());
        }
        if self.store.supports_fts() {
            let scored = self.store.search_fts(query, session_id, top_k).await?;
            let mut results = Vec::with_capacity(scored.len());
            for (record_id, score) in scored {
                if let Some(record) = self.store.get(&record_id).await? {
                    results.push(MemoryResult { record, score });
                }
            }
            return Ok(results);
        }

        // Fallback: keyword overlap over a full scan.
        let query_tokens = tokenize(query);
        if query_tokens.is_empty() {
            return Ok(Vec::new());
        }
        let records = self.store.list(session_id).await?;
        let mut results: Vec<MemoryResult> = records
            .into_iter()
            .filter_map(|record| {
                let tokens = tokenize(&record.content);
                let overlap = query_tokens.iter().filter(|t| tokens.contains(*t)).count();
                if overlap == 0 {
                    return None;
                }
                let score = overlap as f64 / query_tokens.len().max(1) as f64;
                Some(MemoryResult { record, score })
            })
            .collect();
        results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        results.truncate(top_k);
        Ok(results)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Vector retriever
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct VectorRetriever {
    pub store: Arc<dyn MemoryStore>,
    pub index: Arc<dyn VectorIndex>,
    pub embedder: Arc<dyn Embedder>,
}

#[async_trait]
impl Retriever for VectorRetriever {
    fn name(&self) -> &'static str {
        "vector"
    }

    async fn retrieve(
        &self,
        query: &str,
        session_id: Option<&str>,
        top_k: usize,
    ) -> Result<Vec<MemoryResult>> {
        if top_k == 0 {
            return Ok(Vec::new());
        }
        let vectors = self.embedder.embed(&[query.to_string()]).await?;
        let Some(query_vec) = vectors.first() else {
            return Ok(Vec::new());
        };
        let mut results = Vec::new();
        for (record_id, score) in self.index.search(query_vec, top_k) {
            if let Some(record) = self.store.get(&record_id).await? {
                if session_id.map(|s| record.session_id == s).unwrap_or(true) {
                    results.push(MemoryResult { record, score });
                }
            }
        }
        Ok(results)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Knowledge graph retriever
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Surfaces stored triples as synthetic `Fact: S P O` records.
pub struct KgRetriever {
    pub store: Arc<SqliteKgStore>,
}

#[async_trait]
impl Retriever for KgRetriever {
    fn name(&self) -> &'static str {
        "kg"
    }

    async fn retrieve(
        &self,
        query: &str,
        session_id: Option<&str>,
        top_k: usize,
    ) -> Result<Vec<MemoryResult>> {
        if top_k == 0 {
            return Ok(Vec::new());
        }
        let triples = self.store.search(query, session_id, top_k).await?;
        Ok(triples.into_iter().map(|triple| triple_to_result(&triple)).collect())
    }
}

/// Build a synthetic fact record from a triple.
pub fn triple_to_result(triple: &crate::types::KgTriple) -> MemoryResult {
    let content = format!(
        "Fact: {} {} {}",
        triple.subject, triple.predicate, triple.object
    );
    let mut metadata = serde_json::Map::new();
    metadata.insert("type".into(), serde_json::Value::from("kg"));
    metadata.insert("subject".into(), serde_json::Value::from(triple.subject.clone()));
    metadata.insert("predicate".into(), serde_json::Value::from(triple.predicate.clone()));
    metadata.insert("object".into(), serde_json::Value::from(triple.object.clone()));
    if let Some(memory_id) = &triple.memory_id {
        metadata.insert("memory_id".into(), serde_json::Value::from(memory_id.clone()));
    }
    let record =
        MemoryRecord::new(triple.session_id.clone(), "system", content).with_metadata(metadata);
    MemoryResult {
        record,
        score: triple.score,
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Reciprocal Rank Fusion
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Fuse ranked lists: `score(r) = Σ 1 / (k + rank_r)`.
///
/// Ties keep first-seen order: lists are folded in argument order and the
/// final sort is stable.
pub fn rrf_fuse(ranked_lists: &[Vec<MemoryResult>], k: usize) -> Vec<MemoryResult> {
    let mut order: Vec<String> = Vec::new();
    let mut scores: std::collections::HashMap<String, f64> = std::collections::HashMap::new();
    let mut records: std::collections::HashMap<String, MemoryRecord> =
        std::collections::HashMap::new();

    for results in ranked_lists {
        for (rank, item) in results.iter().enumerate() {
            let key = item.record.id.clone();
            let contribution = 1.0 / (k as f64 + (rank + 1) as f64);
            match scores.get_mut(&key) {
                Some(score) => *score += contribution,
                None => {
                    scores.insert(key.clone(), contribution);
                    records.insert(key.clone(), item.record.clone());
                    order.push(key);
                }
            }
        }
    }

    let mut fused: Vec<MemoryResult> = order
        .into_iter()
        .map(|key| MemoryResult {
            score: scores[&key],
            record: records.remove(&key).unwrap_or_else(|| {
                MemoryRecord::new("", "system", "")
            }),
        })
        .collect();
    fused.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    fused
}

pub(crate) fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut buf = String::new();
    for ch in text.to_lowercase().chars() {
        if ch.is_alphanumeric() {
            buf.push(ch);
        } else {
            if !buf.is_empty() {
                tokens.push(std::mem::take(&mut buf));
            }
            if ('\u{4e00}'..='\u{9fff}').contains(&ch) {
                tokens.push(ch.to_string());
            }
        }
    }
    if !buf.is_empty() {
        tokens.push(buf);
    }
    tokens
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;

    fn result(record: &MemoryRecord, score: f64) -> MemoryResult {
        MemoryResult {
            record: record.clone(),
            score,
        }
    }

    #[test]
    fn rrf_scores_sum_across_lists() {
        let a = MemoryRecord::new("s", "user", "a");
        let b = MemoryRecord::new("s", "user", "b");
        let fused = rrf_fuse(
            &[
                vec![result(&a, 0.9), result(&b, 0.5)],
                vec![result(&b, 0.8)],
            ],
            60,
        );
        assert_eq!(fused.len(), 2);
        // b appears in both lists: 1/62 + 1/61 > a's 1/61.
        assert_eq!(fused[0].record.id, b.id);
        let expected_b = 1.0 / 62.0 + 1.0 / 61.0;
        assert!((fused[0].score - expected_b).abs() < 1e-12);
    }

    #[test]
    fn rrf_duplicate_list_is_monotone() {
        let a = MemoryRecord::new("s", "user", "a");
        let b = MemoryRecord::new("s", "user", "b");
        let list = vec![result(&a, 0.9), result(&b, 0.5)];
        let single = rrf_fuse(&[list.clone()], 60);
        let doubled = rrf_fuse(&[list.clone(), list], 60);
        for (one, two) in single.iter().zip(&doubled) {
            assert_eq!(one.record.id, two.record.id);
            assert!(two.score >= one.score);
        }
    }

    #[test]
    fn rrf_ties_keep_first_seen_order() {
        let a = MemoryRecord::new("s", "user", "a");
        let b = MemoryRecord::new("s", "user", "b");
        // Two lists, each contributing one distinct record at rank 1.
        let fused = rrf_fuse(&[vec![result(&a, 1.0)], vec![result(&b, 1.0)]], 60);
        assert_eq!(fused[0].record.id, a.id);
        assert_eq!(fused[1].record.id, b.id);
        assert!((fused[0].score - fused[1].score).abs() < 1e-12);
    }

    #[test]
    fn rrf_empty_lists_are_noops() {
        assert!(rrf_fuse(&[], 60).is_empty());
        let a = MemoryRecord::new("s", "user", "a");
        let fused = rrf_fuse(&[vec![result(&a, 1.0)], Vec::new()], 60);
        assert_eq!(fused.len(), 1);
    }

    #[tokio::test]
    async fn bm25_fallback_scans_without_fts() {
        let store = Arc::new(InMemoryStore::new(100));
        use crate::store::MemoryStore as _;
        store
            .add(MemoryRecord::new("s1", "user", "hello world"), None)
            .await
            .unwrap();
        store
            .add(MemoryRecord::new("s1", "user", "unrelated text"), None)
            .await
            .unwrap();

        let retriever = Bm25Retriever { store };
        let hits = retriever.retrieve("hello", Some("s1"), 5).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].record.content, "hello world");
    }

    #[tokio::test]
    async fn empty_query_fallback_is_empty() {
        let store = Arc::new(InMemoryStore::new(10));
        let retriever = Bm25Retriever { store };
        assert!(retriever.retrieve("", Some("s1"), 5).await.unwrap().is_empty());
    }
}
