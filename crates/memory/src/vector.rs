//! Embedders and the vector index.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use cerise_domain::error::{Error, Result};
use cerise_providers::{CapabilityKind, ProviderRegistry};

/// Text embedding interface.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Deterministic hash-based embedder (fallback when no provider embeds).
///
/// Tokens are FNV-1a hashed into buckets; the bucket-count vector is
/// L2-normalized. Deterministic across runs, so persisted ids stay valid.
pub struct HashEmbedder {
    dim: usize,
}

impl HashEmbedder {
    pub fn new(dim: usize) -> Self {
        Self { dim: dim.max(1) }
    }

    fn tokenize(text: &str) -> Vec<String> {
        let mut tokens = Vec::new();
        let mut buf = String::new();
        for ch in text.to_lowercase().chars() {
            if ch.is_alphanumeric() || ch == '\'' {
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
}

fn fnv1a(data: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in data {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|text| {
                let mut vec = vec![0.0f32; self.dim];
                for token in Self::tokenize(text) {
                    let idx = (fnv1a(token.as_bytes()) % self.dim as u64) as usize;
                    vec[idx] += 1.0;
                }
                let norm = vec.iter().map(|v| v * v).sum::<f32>().sqrt();
                if norm > 0.0 {
                    for v in &mut vec {
                        *v /= norm;
                    }
                }
                vec
            })
            .collect())
    }
}

/// Embedder backed by a provider with embedding capability.
pub struct ProviderEmbedder {
    registry: Arc<ProviderRegistry>,
    provider_id: Option<String>,
    model: Option<String>,
}

impl ProviderEmbedder {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        provider_id: Option<String>,
        model: Option<String>,
    ) -> Self {
        Self {
            registry,
            provider_id,
            model,
        }
    }
}

#[async_trait]
impl Embedder for ProviderEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let provider = match &self.provider_id {
            Some(id) if !id.is_empty() => self.registry.get(id),
            _ => self.registry.find_with_capability(CapabilityKind::Embeddings),
        }
        .ok_or_else(|| Error::FailedPrecondition("no embedding provider available".into()))?;
        if !provider.capabilities().embeddings {
            return Err(Error::FailedPrecondition(
                "selected provider does not support embeddings".into(),
            ));
        }
        provider.embed(texts.to_vec(), self.model.clone()).await
    }
}

/// Vector index interface.
pub trait VectorIndex: Send + Sync {
    fn add(&self, ids: &[String], vectors: &[Vec<f32>]) -> Result<()>;

    /// Top-k `(record_id, cosine_score)` nearest entries.
    fn search(&self, vector: &[f32], top_k: usize) -> Vec<(String, f64)>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-memory cosine similarity index.
pub struct InMemoryVectorIndex {
    dim: usize,
    entries: RwLock<Vec<(String, Vec<f32>)>>,
}

impl InMemoryVectorIndex {
    pub fn new(dim: usize) -> Self {
        Self {
            dim: dim.max(1),
            entries: RwLock::new(Vec::new()),
        }
    }
}

impl VectorIndex for InMemoryVectorIndex {
    fn add(&self, ids: &[String], vectors: &[Vec<f32>]) -> Result<()> {
        if ids.len() != vectors.len() {
            return Err(Error::InvalidArgument(
                "ids and vectors length mismatch".into(),
            ));
        }
        let mut entries = self.entries.write();
        for (id, vector) in ids.iter().zip(vectors) {
            if vector.len() != self.dim {
                return Err(Error::InvalidArgument("vector dimension mismatch".into()));
            }
            entries.retain(|(existing, _)| existing != id);
            entries.push((id.clone(), vector.clone()));
        }
        Ok(())
    }

    fn search(&self, vector: &[f32], top_k: usize) -> Vec<(String, f64)> {
        if top_k == 0 {
            return Vec::new();
        }
        let query_norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if query_norm == 0.0 {
            return Vec::new();
        }
        let entries = self.entries.read();
        let mut scored: Vec<(String, f64)> = entries
            .iter()
            .map(|(id, candidate)| {
                let dot: f32 = vector.iter().zip(candidate).map(|(a, b)| a * b).sum();
                let norm = candidate.iter().map(|v| v * v).sum::<f32>().sqrt();
                let score = if norm > 0.0 {
                    f64::from(dot / (norm * query_norm))
                } else {
                    0.0
                };
                (id.clone(), score)
            })
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);
        scored
    }

    fn len(&self) -> usize {
        self.entries.read().len()
    }
}

/// Cosine similarity between two vectors (0.0 on degenerate input).
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b) {
        dot += f64::from(*x) * f64::from(*y);
        norm_a += f64::from(*x) * f64::from(*x);
        norm_b += f64::from(*y) * f64::from(*y);
    }
    if norm_a <= 0.0 || norm_b <= 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn hash_embedder_is_deterministic_and_normalized() {
        let embedder = HashEmbedder::new(64);
        let a = embedder.embed(&["hello world".into()]).await.unwrap();
        let b = embedder.embed(&["hello world".into()]).await.unwrap();
        assert_eq!(a, b);
        let norm: f32 = a[0].iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn similar_texts_score_higher() {
        let embedder = HashEmbedder::new(128);
        let vectors = embedder
            .embed(&[
                "the cat sat on the mat".into(),
                "the cat sat on a mat".into(),
                "quantum entanglement research".into(),
            ])
            .await
            .unwrap();
        let near = cosine_similarity(&vectors[0], &vectors[1]);
        let far = cosine_similarity(&vectors[0], &vectors[2]);
        assert!(near > far);
    }

    #[tokio::test]
    async fn index_search_ranks_by_cosine() {
        let embedder = HashEmbedder::new(64);
        let index = InMemoryVectorIndex::new(64);
        let texts = ["apples and oranges", "apples and pears", "rocket engines"];
        let vectors = embedder
            .embed(&texts.iter().map(|t| t.to_string()).collect::<Vec<_>>())
            .await
            .unwrap();
        index
            .add(
                &["a".into(), "b".into(), "c".into()],
                &vectors,
            )
            .unwrap();

        let query = embedder.embed(&["apples".into()]).await.unwrap();
        let hits = index.search(&query[0], 2);
        assert_eq!(hits.len(), 2);
        assert!(hits.iter().all(|(id, _)| id == "a" || id == "b"));
    }

    #[test]
    fn re_adding_an_id_replaces_its_vector() {
        let index = InMemoryVectorIndex::new(2);
        index.add(&["x".into()], &[vec![1.0, 0.0]]).unwrap();
        index.add(&["x".into()], &[vec![0.0, 1.0]]).unwrap();
        assert_eq!(index.len(), 1);
        let hits = index.search(&[0.0, 1.0], 1);
        assert!(hits[0].1 > 0.99);
    }

    #[test]
    fn dimension_mismatch_rejected() {
        let index = InMemoryVectorIndex::new(4);
        assert!(index.add(&["x".into()], &[vec![1.0, 0.0]]).is_err());
    }
}
