//! Memory scoring strategies applied on top of fused retrieval scores.

use chrono::Utc;

use cerise_domain::config::MemoryScoringConfig;

use crate::retrieval::tokenize;
use crate::types::MemoryRecord;

/// Scoring strategy for memory records.
pub trait MemoryScorer: Send + Sync {
    fn name(&self) -> &'static str;

    fn score(&self, query: &str, record: &MemoryRecord) -> f64;
}

/// Simple keyword overlap.
pub struct KeywordOverlapScorer;

impl MemoryScorer for KeywordOverlapScorer {
    fn name(&self) -> &'static str {
        "keyword_overlap"
    }

    fn score(&self, query: &str, record: &MemoryRecord) -> f64 {
        let query_tokens = tokenize(query);
        if query_tokens.is_empty() {
            return 0.0;
        }
        let record_tokens = tokenize(&record.content);
        let overlap = query_tokens
            .iter()
            .filter(|t| record_tokens.contains(*t))
            .count();
        overlap as f64 / query_tokens.len() as f64
    }
}

/// Exponential decay boost for recent memories.
pub struct RecencyScorer {
    pub half_life_seconds: f64,
    pub weight: f64,
}

impl MemoryScorer for RecencyScorer {
    fn name(&self) -> &'static str {
        "recency"
    }

    fn score(&self, _query: &str, record: &MemoryRecord) -> f64 {
        let age = (Utc::now() - record.created_at).num_milliseconds() as f64 / 1000.0;
        let age = age.max(0.0);
        let half_life = self.half_life_seconds.max(1.0);
        0.5f64.powf(age / half_life) * self.weight
    }
}

/// Boost for high-importance memories (`importance` in [0, 100]).
pub struct ImportanceScorer {
    pub weight: f64,
}

impl MemoryScorer for ImportanceScorer {
    fn name(&self) -> &'static str {
        "importance"
    }

    fn score(&self, _query: &str, record: &MemoryRecord) -> f64 {
        match record.importance() {
            Some(importance) => (importance / 100.0).clamp(0.0, 1.0) * self.weight,
            None => 0.0,
        }
    }
}

/// Boost for emotionally marked memories.
pub struct EmotionImpactScorer {
    pub weight: f64,
}

impl MemoryScorer for EmotionImpactScorer {
    fn name(&self) -> &'static str {
        "emotion"
    }

    fn score(&self, _query: &str, record: &MemoryRecord) -> f64 {
        let impact = record
            .emotional_impact()
            .map(|v| (v / 100.0).clamp(0.0, 1.0))
            .unwrap_or(0.0);
        let intensity = emotion_intensity(record);
        impact.max(intensity) * self.weight
    }
}

/// Boost for frequently accessed memories, capped at `max_access_count`.
pub struct ReinforcementScorer {
    pub weight: f64,
    pub max_access_count: u64,
}

impl MemoryScorer for ReinforcementScorer {
    fn name(&self) -> &'static str {
        "reinforcement"
    }

    fn score(&self, _query: &str, record: &MemoryRecord) -> f64 {
        let count = record.access_count();
        if count == 0 {
            return 0.0;
        }
        let cap = self.max_access_count.max(1);
        (count as f64 / cap as f64).min(1.0) * self.weight
    }
}

/// Intensity of the record's emotion block in [0, 1]. Falls back to the mean
/// absolute value over numeric fields when no `intensity` key exists.
pub fn emotion_intensity(record: &MemoryRecord) -> f64 {
    let Some(emotion) = record.emotion() else {
        return 0.0;
    };
    if let Some(intensity) = emotion.get("intensity").and_then(serde_json::Value::as_f64) {
        return intensity.clamp(0.0, 1.0);
    }
    if let Some(confidence) = emotion.get("confidence").and_then(serde_json::Value::as_f64) {
        return confidence.clamp(0.0, 1.0);
    }
    let values: Vec<f64> = emotion
        .values()
        .filter_map(serde_json::Value::as_f64)
        .map(f64::abs)
        .collect();
    if values.is_empty() {
        return 0.0;
    }
    (values.iter().sum::<f64>() / values.len() as f64).clamp(0.0, 1.0)
}

/// The default scorer set, weighted from config.
pub fn default_scorers(config: &MemoryScoringConfig) -> Vec<Box<dyn MemoryScorer>> {
    vec![
        Box::new(KeywordOverlapScorer),
        Box::new(RecencyScorer {
            half_life_seconds: config.recency_half_life_seconds as f64,
            weight: config.recency_weight,
        }),
        Box::new(ImportanceScorer {
            weight: config.importance_weight,
        }),
        Box::new(EmotionImpactScorer {
            weight: config.emotional_weight,
        }),
        Box::new(ReinforcementScorer {
            weight: config.reinforcement_weight,
            max_access_count: config.max_access_count,
        }),
    ]
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::*;

    #[test]
    fn keyword_overlap_fraction() {
        let record = MemoryRecord::new("s", "user", "the quick brown fox");
        let scorer = KeywordOverlapScorer;
        assert!((scorer.score("quick fox", &record) - 1.0).abs() < 1e-9);
        assert!((scorer.score("quick turtle", &record) - 0.5).abs() < 1e-9);
        assert_eq!(scorer.score("", &record), 0.0);
    }

    #[test]
    fn recency_decays_with_age() {
        let fresh = MemoryRecord::new("s", "user", "x");
        let mut stale = MemoryRecord::new("s", "user", "y");
        stale.created_at = Utc::now() - chrono::Duration::hours(6);
        let scorer = RecencyScorer { half_life_seconds: 1800.0, weight: 1.0 };
        assert!(scorer.score("", &fresh) > scorer.score("", &stale));
        assert!(scorer.score("", &stale) < 0.01);
    }

    #[test]
    fn importance_scaled_and_clamped() {
        let mut record = MemoryRecord::new("s", "user", "x");
        record.metadata.insert("importance".into(), json!(250));
        let scorer = ImportanceScorer { weight: 0.15 };
        assert!((scorer.score("", &record) - 0.15).abs() < 1e-9);
    }

    #[test]
    fn emotion_intensity_prefers_explicit_key() {
        let mut record = MemoryRecord::new("s", "user", "x");
        record.metadata.insert(
            "emotion".into(),
            json!({ "intensity": 0.8, "valence": -0.2 }),
        );
        assert!((emotion_intensity(&record) - 0.8).abs() < 1e-9);

        record
            .metadata
            .insert("emotion".into(), json!({ "valence": -0.4, "arousal": 0.6 }));
        assert!((emotion_intensity(&record) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn reinforcement_caps_at_weight() {
        let mut record = MemoryRecord::new("s", "user", "x");
        record
            .metadata
            .insert("access_count".into(), Value::from(100));
        let scorer = ReinforcementScorer { weight: 0.05, max_access_count: 20 };
        assert!((scorer.score("", &record) - 0.05).abs() < 1e-9);
    }
}
