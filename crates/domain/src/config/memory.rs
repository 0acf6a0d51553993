//! Memory engine configuration.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::default_true;

/// Episodic storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryStoreConfig {
    /// `sqlite` | `state` | `memory`.
    #[serde(default = "default_backend")]
    pub backend: String,
    #[serde(default)]
    pub sqlite_path: String,
    #[serde(default)]
    pub state_path: String,
    /// Per-record time-to-live; `0` disables expiry.
    #[serde(default)]
    pub ttl_seconds: i64,
    #[serde(default = "default_max_records")]
    pub max_records_per_session: usize,
}

impl Default for MemoryStoreConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            sqlite_path: String::new(),
            state_path: String::new(),
            ttl_seconds: 0,
            max_records_per_session: default_max_records(),
        }
    }
}

/// Sparse (BM25) retrieval configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemorySparseConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_top_k_5")]
    pub top_k: usize,
}

impl Default for MemorySparseConfig {
    fn default() -> Self {
        Self { enabled: true, top_k: 5 }
    }
}

/// Vector retrieval configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryVectorConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// `hash` | `provider`.
    #[serde(default = "default_embedding_backend")]
    pub embedding_backend: String,
    #[serde(default = "default_embedding_dim")]
    pub embedding_dim: usize,
    #[serde(default)]
    pub embedding_provider: String,
    #[serde(default)]
    pub embedding_model: String,
    #[serde(default = "default_top_k_5")]
    pub top_k: usize,
}

impl Default for MemoryVectorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            embedding_backend: default_embedding_backend(),
            embedding_dim: default_embedding_dim(),
            embedding_provider: String::new(),
            embedding_model: String::new(),
            top_k: 5,
        }
    }
}

/// Knowledge graph configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryKgConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_top_k_3")]
    pub top_k: usize,
    #[serde(default = "default_true")]
    pub auto_extract: bool,
}

impl Default for MemoryKgConfig {
    fn default() -> Self {
        Self { enabled: true, top_k: 3, auto_extract: true }
    }
}

/// Recall configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryRecallConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_top_k_8")]
    pub top_k: usize,
    #[serde(default = "default_min_score")]
    pub min_score: f64,
    #[serde(default = "default_rrf_k")]
    pub rrf_k: usize,
    #[serde(default = "default_true")]
    pub touch_on_recall: bool,
    #[serde(default)]
    pub random_enabled: bool,
    #[serde(default = "default_one")]
    pub random_k: usize,
    #[serde(default = "default_random_probability")]
    pub random_probability: f64,
    #[serde(default = "default_trigger_keywords")]
    pub trigger_keywords: Vec<String>,
}

impl Default for MemoryRecallConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            top_k: 8,
            min_score: default_min_score(),
            rrf_k: default_rrf_k(),
            touch_on_recall: true,
            random_enabled: false,
            random_k: 1,
            random_probability: default_random_probability(),
            trigger_keywords: default_trigger_keywords(),
        }
    }
}

/// Associative (graph-walking) recall configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryAssociationConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_one")]
    pub max_hops: usize,
    #[serde(default = "default_top_k_5")]
    pub top_k: usize,
    #[serde(default = "default_max_entities")]
    pub max_entities: usize,
    #[serde(default = "default_true")]
    pub include_facts: bool,
    #[serde(default = "default_true")]
    pub expand_from_query: bool,
    #[serde(default = "default_true")]
    pub expand_from_results: bool,
    #[serde(default = "default_association_min_score")]
    pub min_score: f64,
}

impl Default for MemoryAssociationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_hops: 1,
            top_k: 5,
            max_entities: default_max_entities(),
            include_facts: true,
            expand_from_query: true,
            expand_from_results: true,
            min_score: default_association_min_score(),
        }
    }
}

/// Scorer weights and the optional emotion-intensity filter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryScoringConfig {
    #[serde(default = "default_recency_half_life")]
    pub recency_half_life_seconds: i64,
    #[serde(default = "default_one_f64")]
    pub recency_weight: f64,
    #[serde(default = "default_importance_weight")]
    pub importance_weight: f64,
    #[serde(default = "default_emotional_weight")]
    pub emotional_weight: f64,
    #[serde(default = "default_reinforcement_weight")]
    pub reinforcement_weight: f64,
    #[serde(default = "default_max_access_count")]
    pub max_access_count: u64,
    #[serde(default)]
    pub emotion_filter_enabled: bool,
    #[serde(default = "default_emotion_min_intensity")]
    pub emotion_min_intensity: f64,
}

impl Default for MemoryScoringConfig {
    fn default() -> Self {
        Self {
            recency_half_life_seconds: default_recency_half_life(),
            recency_weight: 1.0,
            importance_weight: default_importance_weight(),
            emotional_weight: default_emotional_weight(),
            reinforcement_weight: default_reinforcement_weight(),
            max_access_count: default_max_access_count(),
            emotion_filter_enabled: false,
            emotion_min_intensity: default_emotion_min_intensity(),
        }
    }
}

/// Rerank configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryRerankConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_top_k_8")]
    pub top_k: usize,
    #[serde(default = "default_rerank_weight")]
    pub weight: f64,
    #[serde(default)]
    pub provider_id: String,
    #[serde(default)]
    pub model: String,
}

impl Default for MemoryRerankConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            top_k: 8,
            weight: default_rerank_weight(),
            provider_id: String::new(),
            model: String::new(),
        }
    }
}

/// Compression configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryCompressionConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_compression_threshold")]
    pub threshold: usize,
    #[serde(default = "default_compression_window")]
    pub window: usize,
    #[serde(default = "default_compression_max_chars")]
    pub max_chars: usize,
    #[serde(default)]
    pub summary_provider_id: String,
    #[serde(default)]
    pub summary_model: String,
    #[serde(default = "default_summary_temperature")]
    pub summary_temperature: f64,
    #[serde(default = "default_summary_max_tokens")]
    pub summary_max_tokens: u32,
}

impl Default for MemoryCompressionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: default_compression_threshold(),
            window: default_compression_window(),
            max_chars: default_compression_max_chars(),
            summary_provider_id: String::new(),
            summary_model: String::new(),
            summary_temperature: default_summary_temperature(),
            summary_max_tokens: default_summary_max_tokens(),
        }
    }
}

/// Extraction pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryPipelineConfig {
    /// `rule` | `llm` | `composite`.
    #[serde(default = "default_extractor")]
    pub extractor: String,
    #[serde(default)]
    pub llm_provider_id: String,
    #[serde(default)]
    pub llm_model: String,
    #[serde(default = "default_summary_temperature")]
    pub llm_temperature: f64,
    #[serde(default = "default_llm_max_tokens")]
    pub llm_max_tokens: u32,
}

impl Default for MemoryPipelineConfig {
    fn default() -> Self {
        Self {
            extractor: default_extractor(),
            llm_provider_id: String::new(),
            llm_model: String::new(),
            llm_temperature: default_summary_temperature(),
            llm_max_tokens: default_llm_max_tokens(),
        }
    }
}

/// Context assembly configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryContextConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_context_max_items")]
    pub max_items: usize,
    #[serde(default = "default_layer_weights")]
    pub layer_weights: HashMap<String, f64>,
    #[serde(default)]
    pub max_per_layer: HashMap<String, usize>,
    #[serde(default = "default_true")]
    pub include_tags: bool,
    #[serde(default = "default_true")]
    pub include_category: bool,
    #[serde(default = "default_true")]
    pub include_emotion: bool,
    #[serde(default)]
    pub include_scores: bool,
}

impl Default for MemoryContextConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_items: default_context_max_items(),
            layer_weights: default_layer_weights(),
            max_per_layer: HashMap::new(),
            include_tags: true,
            include_category: true,
            include_emotion: true,
            include_scores: false,
        }
    }
}

/// One layered store (core / semantic / procedural).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryLayerStoreConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// `sqlite` | `state` | `memory`.
    #[serde(default = "default_backend")]
    pub backend: String,
    #[serde(default)]
    pub sqlite_path: String,
    #[serde(default)]
    pub state_path: String,
    #[serde(default = "default_max_records")]
    pub max_records: usize,
}

impl Default for MemoryLayerStoreConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            backend: default_backend(),
            sqlite_path: String::new(),
            state_path: String::new(),
            max_records: default_max_records(),
        }
    }
}

/// Background maintenance sweep.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryMaintenanceConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_maintenance_interval")]
    pub interval_seconds: u64,
}

impl Default for MemoryMaintenanceConfig {
    fn default() -> Self {
        Self { enabled: false, interval_seconds: default_maintenance_interval() }
    }
}

/// Overall memory configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryConfig {
    #[serde(default)]
    pub store: MemoryStoreConfig,
    #[serde(default)]
    pub l1_core: MemoryLayerStoreConfig,
    #[serde(default)]
    pub l2_semantic: MemoryLayerStoreConfig,
    #[serde(default)]
    pub l4_procedural: MemoryLayerStoreConfig,
    #[serde(default)]
    pub sparse: MemorySparseConfig,
    #[serde(default)]
    pub vector: MemoryVectorConfig,
    #[serde(default)]
    pub kg: MemoryKgConfig,
    #[serde(default)]
    pub recall: MemoryRecallConfig,
    #[serde(default)]
    pub association: MemoryAssociationConfig,
    #[serde(default)]
    pub scoring: MemoryScoringConfig,
    #[serde(default)]
    pub rerank: MemoryRerankConfig,
    #[serde(default)]
    pub compression: MemoryCompressionConfig,
    #[serde(default)]
    pub pipeline: MemoryPipelineConfig,
    #[serde(default)]
    pub context: MemoryContextConfig,
    #[serde(default)]
    pub maintenance: MemoryMaintenanceConfig,
}

fn default_backend() -> String {
    "sqlite".into()
}
fn default_embedding_backend() -> String {
    "hash".into()
}
fn default_extractor() -> String {
    "rule".into()
}
fn default_max_records() -> usize {
    200
}
fn default_embedding_dim() -> usize {
    256
}
fn default_top_k_3() -> usize {
    3
}
fn default_top_k_5() -> usize {
    5
}
fn default_top_k_8() -> usize {
    8
}
fn default_one() -> usize {
    1
}
fn default_one_f64() -> f64 {
    1.0
}
fn default_min_score() -> f64 {
    0.05
}
fn default_rrf_k() -> usize {
    60
}
fn default_random_probability() -> f64 {
    0.1
}
fn default_trigger_keywords() -> Vec<String> {
    vec!["random".into(), "surprise".into(), "想起".into(), "突然想到".into()]
}
fn default_max_entities() -> usize {
    12
}
fn default_association_min_score() -> f64 {
    0.02
}
fn default_recency_half_life() -> i64 {
    1800
}
fn default_importance_weight() -> f64 {
    0.15
}
fn default_emotional_weight() -> f64 {
    0.1
}
fn default_reinforcement_weight() -> f64 {
    0.05
}
fn default_max_access_count() -> u64 {
    20
}
fn default_emotion_min_intensity() -> f64 {
    0.2
}
fn default_rerank_weight() -> f64 {
    0.35
}
fn default_compression_threshold() -> usize {
    80
}
fn default_compression_window() -> usize {
    40
}
fn default_compression_max_chars() -> usize {
    1000
}
fn default_summary_temperature() -> f64 {
    0.2
}
fn default_summary_max_tokens() -> u32 {
    400
}
fn default_llm_max_tokens() -> u32 {
    800
}
fn default_context_max_items() -> usize {
    12
}
fn default_layer_weights() -> HashMap<String, f64> {
    HashMap::from([
        ("core".into(), 1.0),
        ("semantic".into(), 1.0),
        ("procedural".into(), 1.0),
        ("episodic".into(), 2.0),
    ])
}
fn default_maintenance_interval() -> u64 {
    300
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_yaml_yields_defaults() {
        let config: MemoryConfig = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config.store.backend, "sqlite");
        assert_eq!(config.store.max_records_per_session, 200);
        assert_eq!(config.recall.rrf_k, 60);
        assert_eq!(config.recall.top_k, 8);
        assert!(config.recall.touch_on_recall);
        assert_eq!(config.rerank.weight, 0.35);
        assert_eq!(config.context.layer_weights["episodic"], 2.0);
    }

    #[test]
    fn partial_section_keeps_other_defaults() {
        let config: MemoryConfig =
            serde_yaml::from_str("recall:\n  random_enabled: true\n  random_probability: 0.0\n")
                .unwrap();
        assert!(config.recall.random_enabled);
        assert_eq!(config.recall.random_probability, 0.0);
        assert_eq!(config.recall.rrf_k, 60);
    }
}
