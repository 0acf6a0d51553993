//! Skill library service: upsert, search, injection, and tool-run audit.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use serde_json::{Map, Value};

use cerise_domain::error::Result;
use cerise_providers::Provider;
use cerise_state::StateStore;

use crate::models::{Skill, ToolRun};
use crate::store::{SkillStore, ToolRunStore};

/// Ring size for per-session tool-run logs.
const TOOL_RUN_KEEP_LAST: usize = 200;

pub struct SkillService {
    store: SkillStore,
    tool_runs: ToolRunStore,
    embedding_provider: Option<Arc<dyn Provider>>,
    embedding_model: Option<String>,
}

impl SkillService {
    pub fn new(state: &StateStore) -> Self {
        Self {
            store: SkillStore::new(state),
            tool_runs: ToolRunStore::new(state, TOOL_RUN_KEEP_LAST),
            embedding_provider: None,
            embedding_model: None,
        }
    }

    pub fn with_embeddings(
        mut self,
        provider: Arc<dyn Provider>,
        model: Option<String>,
    ) -> Self {
        self.embedding_provider = Some(provider);
        self.embedding_model = model;
        self
    }

    /// Insert or update a skill. `created_at` is preserved on update;
    /// `updated_at` always moves forward.
    pub async fn upsert(
        &self,
        skill_id: Option<&str>,
        name: &str,
        description: &str,
        code: &str,
        tags: Vec<String>,
    ) -> Result<Skill> {
        let now = Utc::now();
        let resolved_id = skill_id
            .map(str::to_string)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let created_at = self
            .store
            .get_skill(&resolved_id)
            .await
            .map(|existing| existing.created_at)
            .unwrap_or(now);
        let skill = Skill {
            id: resolved_id,
            name: name.to_string(),
            description: description.to_string(),
            code: code.to_string(),
            tags,
            created_at,
            updated_at: now,
        };
        self.store.upsert_skill(&skill).await?;
        Ok(skill)
    }

    pub async fn list(&self) -> Vec<Skill> {
        self.store.list_skills().await
    }

    pub async fn get(&self, skill_id: &str) -> Option<Skill> {
        self.store.get_skill(skill_id).await
    }

    pub async fn delete(&self, skill_id: &str) -> Result<bool> {
        self.store.delete_skill(skill_id).await
    }

    /// Top-k skills relevant to the query: embedding cosine similarity when
    /// an embedding provider is configured, Jaccard token overlap otherwise.
    pub async fn search(&self, query: &str, top_k: usize) -> Vec<Skill> {
        let skills = self.store.list_skills().await;
        if skills.is_empty() || query.is_empty() {
            return Vec::new();
        }
        let top_k = top_k.max(1);

        if let Some(provider) = &self.embedding_provider {
            let mut texts = vec![query.to_string()];
            texts.extend(skills.iter().map(Skill::search_text));
            match provider.embed(texts, self.embedding_model.clone()).await {
                Ok(vectors) if vectors.len() == skills.len() + 1 => {
                    let query_vec = &vectors[0];
                    let mut scored: Vec<(Skill, f64)> = skills
                        .into_iter()
                        .zip(vectors[1..].iter())
                        .map(|(skill, vec)| (skill, cosine(query_vec, vec)))
                        .collect();
                    scored.sort_by(|a, b| {
                        b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal)
                    });
                    return scored
                        .into_iter()
                        .take(top_k)
                        .filter(|(_, score)| *score > 0.0)
                        .map(|(skill, _)| skill)
                        .collect();
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::debug!(error = %e, "embedding search failed, using token overlap");
                }
            }
        }

        let query_tokens = tokenize(query);
        let mut scored: Vec<(Skill, f64)> = skills
            .into_iter()
            .map(|skill| {
                let score = jaccard(&query_tokens, &tokenize(&skill.search_text()));
                (skill, score)
            })
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored
            .into_iter()
            .take(top_k)
            .filter(|(_, score)| *score > 0.0)
            .map(|(skill, _)| skill)
            .collect()
    }

    /// Format skills into the dialogue's `[Skill Library]` block.
    pub fn build_injection_block(skills: &[Skill]) -> String {
        if skills.is_empty() {
            return String::new();
        }
        let mut lines = vec!["[Skill Library]".to_string()];
        for skill in skills {
            let mut header = format!("- {}", skill.name);
            if !skill.description.is_empty() {
                header.push_str(&format!(": {}", skill.description));
            }
            lines.push(header);
            if !skill.code.is_empty() {
                lines.push("```".into());
                lines.push(skill.code.trim().to_string());
                lines.push("```".into());
            }
        }
        lines.push("[/Skill Library]".into());
        lines.join("\n")
    }

    // ── Tool-run audit log ─────────────────────────────────────────

    #[allow(clippy::too_many_arguments)]
    pub async fn record_tool_run(
        &self,
        session_id: &str,
        tool_name: &str,
        tool_call_id: Option<&str>,
        arguments: Map<String, Value>,
        provider: &str,
        model: &str,
        success: bool,
        output: &str,
        error: Option<&str>,
    ) -> Result<ToolRun> {
        let run = ToolRun {
            id: uuid::Uuid::new_v4().to_string(),
            session_id: session_id.to_string(),
            tool_name: tool_name.to_string(),
            tool_call_id: tool_call_id.map(str::to_string),
            arguments,
            provider: provider.to_string(),
            model: model.to_string(),
            success,
            output: output.to_string(),
            error: error.map(str::to_string),
            created_at: Utc::now(),
        };
        self.tool_runs.append(session_id, &run).await?;
        Ok(run)
    }

    pub async fn list_tool_runs(&self, session_id: &str, limit: Option<usize>) -> Vec<ToolRun> {
        self.tool_runs.list(session_id, limit).await
    }

    pub async fn clear_tool_runs(&self, session_id: &str) -> Result<()> {
        self.tool_runs.clear(session_id).await
    }
}

fn tokenize(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_ascii_alphanumeric() && c != '_')
        .filter(|token| !token.is_empty())
        .map(str::to_string)
        .collect()
}

fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count() as f64;
    let union = a.union(b).count() as f64;
    intersection / union
}

fn cosine(a: &[f32], b: &[f32]) -> f64 {
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
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> SkillService {
        SkillService::new(&StateStore::in_memory())
    }

    #[tokio::test]
    async fn upsert_preserves_created_at() {
        let service = service();
        let first = service
            .upsert(Some("sk1"), "greet", "say hello", "print('hi')", vec![])
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let second = service
            .upsert(Some("sk1"), "greet", "say hello nicely", "print('hi!')", vec![])
            .await
            .unwrap();
        assert_eq!(first.created_at, second.created_at);
        assert!(second.updated_at > first.updated_at);
        assert_eq!(service.list().await.len(), 1);
    }

    #[tokio::test]
    async fn search_by_token_overlap() {
        let service = service();
        service
            .upsert(None, "web scraping", "fetch pages from the web", "", vec![])
            .await
            .unwrap();
        service
            .upsert(None, "date math", "compute date differences", "", vec![])
            .await
            .unwrap();

        let hits = service.search("scraping web pages", 1).await;
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].name, "web scraping");

        assert!(service.search("", 3).await.is_empty());
        assert!(service.search("nonexistent topic zzz", 3).await.is_empty());
    }

    #[tokio::test]
    async fn injection_block_format() {
        let service = service();
        let skill = service
            .upsert(None, "greet", "say hello", "print('hi')", vec![])
            .await
            .unwrap();
        let block = SkillService::build_injection_block(&[skill]);
        assert!(block.starts_with("[Skill Library]"));
        assert!(block.contains("- greet: say hello"));
        assert!(block.contains("```\nprint('hi')\n```"));
        assert!(block.ends_with("[/Skill Library]"));
        assert!(SkillService::build_injection_block(&[]).is_empty());
    }

    #[tokio::test]
    async fn tool_run_ring_caps_at_200() {
        let service = service();
        for i in 0..205 {
            service
                .record_tool_run(
                    "s1",
                    &format!("tool{i}"),
                    None,
                    Map::new(),
                    "p",
                    "m",
                    true,
                    "ok",
                    None,
                )
                .await
                .unwrap();
        }
        let runs = service.list_tool_runs("s1", None).await;
        assert_eq!(runs.len(), 200);
        assert_eq!(runs[0].tool_name, "tool5");

        let limited = service.list_tool_runs("s1", Some(10)).await;
        assert_eq!(limited.len(), 10);
        assert_eq!(limited[9].tool_name, "tool204");

        service.clear_tool_runs("s1").await.unwrap();
        assert!(service.list_tool_runs("s1", None).await.is_empty());
    }

    #[tokio::test]
    async fn delete_skill() {
        let service = service();
        let skill = service.upsert(None, "x", "", "", vec![]).await.unwrap();
        assert!(service.delete(&skill.id).await.unwrap());
        assert!(!service.delete(&skill.id).await.unwrap());
        assert!(service.get(&skill.id).await.is_none());
    }
}
