//! Multi-layer memory context assembly for prompt injection.

use std::sync::Arc;

use cerise_domain::config::MemoryContextConfig;
use cerise_domain::error::Result;

use crate::layers::{CoreProfileLayer, ProceduralHabitsLayer, SemanticFactsLayer};
use crate::scorers::emotion_intensity;
use crate::types::{MemoryRecord, MemoryResult};

/// Builds the layered `[Core Profile] / [Facts] / [Habits] /
/// [Episodic Recall]` context block, allocating item quotas across layers
/// proportional to their configured weights.
pub struct MemoryContextBuilder {
    pub config: MemoryContextConfig,
    pub core_profiles: Option<Arc<dyn CoreProfileLayer>>,
    pub facts: Option<Arc<dyn SemanticFactsLayer>>,
    pub habits: Option<Arc<dyn ProceduralHabitsLayer>>,
}

impl MemoryContextBuilder {
    pub fn new(config: MemoryContextConfig) -> Self {
        Self {
            config,
            core_profiles: None,
            facts: None,
            habits: None,
        }
    }

    pub async fn build(
        &self,
        results: &[MemoryResult],
        session_id: Option<&str>,
    ) -> Result<String> {
        if !self.config.enabled {
            return Ok(String::new());
        }
        let quotas = self.allocate_quotas();
        let mut sections: Vec<String> = Vec::new();

        let core_quota = quotas_get(&quotas, "core");
        if core_quota > 0 {
            if let (Some(layer), Some(session)) = (&self.core_profiles, session_id) {
                let profiles = layer.list_profiles(Some(session)).await?;
                if !profiles.is_empty() {
                    let mut lines = vec!["[Core Profile]".to_string()];
                    for profile in profiles.iter().take(core_quota) {
                        if profile.summary.is_empty() {
                            continue;
                        }
                        let label = if profile.profile_id.is_empty() {
                            String::new()
                        } else {
                            format!("{}: ", profile.profile_id)
                        };
                        lines.push(format!("- {label}{}", profile.summary));
                    }
                    sections.push(lines.join("\n"));
                }
            }
        }

        let fact_quota = quotas_get(&quotas, "semantic");
        if fact_quota > 0 {
            if let (Some(layer), Some(session)) = (&self.facts, session_id) {
                let facts = layer.list_facts(Some(session), None).await?;
                if !facts.is_empty() {
                    let mut lines = vec!["[Facts]".to_string()];
                    for fact in facts.iter().take(fact_quota) {
                        lines.push(format!("- {} {} {}", fact.subject, fact.predicate, fact.object));
                    }
                    sections.push(lines.join("\n"));
                }
            }
        }

        let habit_quota = quotas_get(&quotas, "procedural");
        if habit_quota > 0 {
            if let (Some(layer), Some(session)) = (&self.habits, session_id) {
                let habits = layer.list_habits(Some(session), None).await?;
                if !habits.is_empty() {
                    let mut lines = vec!["[Habits]".to_string()];
                    for habit in habits.iter().take(habit_quota) {
                        lines.push(format!("- {}: {}", habit.task_type, habit.instruction));
                    }
                    sections.push(lines.join("\n"));
                }
            }
        }

        let episodic_quota = quotas_get(&quotas, "episodic");
        if episodic_quota > 0 && !results.is_empty() {
            sections.push(self.format_results(&results[..episodic_quota.min(results.len())]));
        }

        Ok(sections.join("\n\n"))
    }

    /// `quota[layer] = floor(max_items * w / Σw)`, remainder distributed to
    /// the highest-weighted layers, then capped by per-layer limits.
    pub fn allocate_quotas(&self) -> Vec<(String, usize)> {
        let weights: Vec<(&String, f64)> = self
            .config
            .layer_weights
            .iter()
            .map(|(layer, weight)| (layer, *weight))
            .collect();
        let total_weight: f64 = weights.iter().map(|(_, w)| w.max(0.0)).sum();
        if total_weight <= 0.0 {
            return Vec::new();
        }

        let max_items = self.config.max_items;
        let mut quotas: Vec<(String, usize)> = Vec::with_capacity(weights.len());
        let mut remainder = max_items as i64;
        for (layer, weight) in &weights {
            let quota = if *weight <= 0.0 || max_items == 0 {
                0
            } else {
                ((max_items as f64) * weight / total_weight).floor() as usize
            };
            remainder -= quota as i64;
            quotas.push(((*layer).clone(), quota));
        }

        if remainder > 0 {
            let mut ordered: Vec<usize> = (0..quotas.len()).collect();
            ordered.sort_by(|a, b| {
                weights[*b]
                    .1
                    .partial_cmp(&weights[*a].1)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
            for index in ordered {
                if remainder <= 0 {
                    break;
                }
                quotas[index].1 += 1;
                remainder -= 1;
            }
        }

        for (layer, quota) in &mut quotas {
            if let Some(cap) = self.config.max_per_layer.get(layer) {
                *quota = (*quota).min(*cap);
            }
        }
        quotas
    }

    fn format_results(&self, results: &[MemoryResult]) -> String {
        let mut lines = vec!["[Episodic Recall]".to_string()];
        for (idx, item) in results.iter().enumerate() {
            let record = &item.record;
            let content = squeeze(&record.content, 200);
            let timestamp = record.created_at.format("%Y-%m-%d %H:%M");
            let suffix = self.format_record_suffix(record, item.score);
            lines.push(format!(
                "{}. ({} @ {timestamp}) {content}{suffix}",
                idx + 1,
                record.role
            ));
        }
        lines.join("\n")
    }

    fn format_record_suffix(&self, record: &MemoryRecord, score: f64) -> String {
        let mut parts: Vec<String> = Vec::new();
        if self.config.include_category {
            if let Some(category) = record.category() {
                parts.push(format!("category={category}"));
            }
        }
        if self.config.include_tags {
            let tags = record.tags();
            if !tags.is_empty() {
                parts.push(format!("tags={}", tags.join(",")));
            }
        }
        if self.config.include_emotion && record.emotion().is_some() {
            parts.push(format!("emotion=intensity:{:.2}", emotion_intensity(record)));
        }
        if self.config.include_scores {
            parts.push(format!("score={score:.2}"));
        }
        if parts.is_empty() {
            String::new()
        } else {
            format!(" [{}]", parts.join(" | "))
        }
    }
}

fn quotas_get(quotas: &[(String, usize)], layer: &str) -> usize {
    quotas
        .iter()
        .find(|(name, _)| name == layer)
        .map(|(_, quota)| *quota)
        .unwrap_or(0)
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
    use std::collections::HashMap;

    use super::*;

    fn builder_with(max_items: usize, weights: &[(&str, f64)]) -> MemoryContextBuilder {
        let config = MemoryContextConfig {
            max_items,
            layer_weights: weights
                .iter()
                .map(|(layer, weight)| (layer.to_string(), *weight))
                .collect(),
            ..Default::default()
        };
        MemoryContextBuilder::new(config)
    }

    fn quota_of(quotas: &[(String, usize)], layer: &str) -> usize {
        quotas_get(quotas, layer)
    }

    #[test]
    fn quotas_proportional_to_weights() {
        let builder = builder_with(10, &[("core", 1.0), ("episodic", 4.0)]);
        let quotas = builder.allocate_quotas();
        assert_eq!(quota_of(&quotas, "core"), 2);
        assert_eq!(quota_of(&quotas, "episodic"), 8);
    }

    #[test]
    fn remainder_goes_to_highest_weight() {
        let builder = builder_with(10, &[("core", 1.0), ("semantic", 1.0), ("episodic", 1.0)]);
        let quotas = builder.allocate_quotas();
        let total: usize = quotas.iter().map(|(_, q)| q).sum();
        assert_eq!(total, 10);
        // Every layer got its floor of 3; the extra went somewhere.
        assert!(quotas.iter().all(|(_, q)| *q >= 3));
    }

    #[test]
    fn per_layer_cap_applies_after_allocation() {
        let mut builder = builder_with(12, &[("core", 1.0), ("episodic", 1.0)]);
        builder.config.max_per_layer = HashMap::from([("core".to_string(), 2)]);
        let quotas = builder.allocate_quotas();
        assert_eq!(quota_of(&quotas, "core"), 2);
        assert_eq!(quota_of(&quotas, "episodic"), 6);
    }

    #[test]
    fn zero_weights_allocate_nothing() {
        let builder = builder_with(10, &[("core", 0.0)]);
        assert!(builder.allocate_quotas().is_empty());
    }

    #[tokio::test]
    async fn episodic_section_renders_without_layers() {
        let builder = builder_with(4, &[("episodic", 1.0)]);
        let record = MemoryRecord::new("s1", "user", "remembered thing");
        let results = vec![MemoryResult { record, score: 0.5 }];
        let context = builder.build(&results, Some("s1")).await.unwrap();
        assert!(context.starts_with("[Episodic Recall]"));
        assert!(context.contains("remembered thing"));
    }

    #[tokio::test]
    async fn disabled_builder_is_empty() {
        let mut builder = builder_with(4, &[("episodic", 1.0)]);
        builder.config.enabled = false;
        let context = builder.build(&[], Some("s1")).await.unwrap();
        assert!(context.is_empty());
    }
}
