//! Memory compression: replace a window of older records with one summary.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;

use cerise_domain::tool::Message;
use cerise_providers::{ChatOptions, ProviderRegistry};

use crate::types::MemoryRecord;

const SUMMARY_SYSTEM_PROMPT: &str =
    "Summarize memory snippets into concise bullet points. Return plain text only.";

/// Optional LLM summarizer used before the local fallback.
#[async_trait]
pub trait SummaryProvider: Send + Sync {
    async fn summarize(&self, records: &[MemoryRecord], max_chars: usize) -> Option<String>;
}

/// Summarizer backed by a chat provider.
pub struct ProviderSummarizer {
    registry: std::sync::Arc<ProviderRegistry>,
    provider_id: String,
    model: Option<String>,
    temperature: f64,
    max_tokens: u32,
}

impl ProviderSummarizer {
    pub fn new(
        registry: std::sync::Arc<ProviderRegistry>,
        provider_id: String,
        model: Option<String>,
        temperature: f64,
        max_tokens: u32,
    ) -> Self {
        Self {
            registry,
            provider_id,
            model,
            temperature,
            max_tokens,
        }
    }
}

#[async_trait]
impl SummaryProvider for ProviderSummarizer {
    async fn summarize(&self, records: &[MemoryRecord], max_chars: usize) -> Option<String> {
        let provider = self.registry.resolve(Some(&self.provider_id))?;
        let model = self
            .model
            .clone()
            .or_else(|| provider.available_models().into_iter().next())?;
        let mut options = ChatOptions::for_model(model);
        options.temperature = self.temperature;
        options.max_tokens = self.max_tokens;

        let prompt = records
            .iter()
            .map(|record| format!("- [{}] {}", record.role, squeeze(&record.content, 200)))
            .collect::<Vec<_>>()
            .join("\n");
        let messages = vec![Message::system(SUMMARY_SYSTEM_PROMPT), Message::user(prompt)];

        match provider.chat(messages, options).await {
            Ok(response) => {
                let summary = response.content.trim().to_string();
                if summary.is_empty() {
                    None
                } else {
                    Some(truncate_chars(&summary, max_chars))
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "summary generation failed");
                None
            }
        }
    }
}

/// Compress older memories into a summary record.
pub struct MemoryCompressor {
    pub threshold: usize,
    pub window: usize,
    pub max_chars: usize,
    pub summary_provider: Option<Box<dyn SummaryProvider>>,
}

impl MemoryCompressor {
    pub fn should_compress(&self, record_count: usize) -> bool {
        self.threshold > 0 && record_count >= self.threshold
    }

    /// The first `window` non-summary records, or nothing when fewer exist.
    pub fn select_records(&self, records: &[MemoryRecord]) -> Vec<MemoryRecord> {
        let candidates: Vec<MemoryRecord> = records
            .iter()
            .filter(|record| !record.is_summary())
            .cloned()
            .collect();
        if candidates.len() < self.window {
            return Vec::new();
        }
        candidates.into_iter().take(self.window).collect()
    }

    /// Summarize via the provider when configured, falling back to local
    /// concatenation.
    pub async fn compress(&self, records: &[MemoryRecord]) -> Option<MemoryRecord> {
        if records.is_empty() {
            return None;
        }
        if let Some(provider) = &self.summary_provider {
            if let Some(summary) = provider.summarize(records, self.max_chars).await {
                return Some(self.build_summary_record(records, &summary, "memory_compressor_llm"));
            }
        }
        Some(self.compress_local(records))
    }

    fn compress_local(&self, records: &[MemoryRecord]) -> MemoryRecord {
        let lines: Vec<String> = records
            .iter()
            .map(|record| format!("- [{}] {}", record.role, squeeze(&record.content, 160)))
            .collect();
        let summary = truncate_chars(&lines.join("\n"), self.max_chars);
        self.build_summary_record(records, &summary, "memory_compressor")
    }

    fn build_summary_record(
        &self,
        records: &[MemoryRecord],
        summary: &str,
        created_by: &str,
    ) -> MemoryRecord {
        let source_ids: Vec<&str> = records.iter().map(|r| r.id.as_str()).collect();
        let first_at = records.iter().map(|r| r.created_at).min().unwrap_or_else(Utc::now);
        let last_at = records.iter().map(|r| r.created_at).max().unwrap_or_else(Utc::now);
        let metadata = json!({
            "summary": true,
            "compressed": true,
            "source_ids": source_ids,
            "source_count": records.len(),
            "source_first_at": first_at.to_rfc3339(),
            "source_last_at": last_at.to_rfc3339(),
            "created_by": created_by,
        });
        MemoryRecord::new(
            records[0].session_id.clone(),
            "system",
            format!("Memory Summary:\n{summary}"),
        )
        .with_metadata(metadata.as_object().cloned().unwrap_or_default())
    }
}

/// Collapse internal whitespace and cap to `max` characters with an ellipsis.
fn squeeze(text: &str, max: usize) -> String {
    let squeezed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    truncate_chars(&squeezed, max)
}

fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let kept: String = text.chars().take(max.saturating_sub(3)).collect();
    format!("{}...", kept.trim_end())
}

#[cfg(test)]
mod tests {
    use serde_json::Value;

    use super::*;

    fn compressor(threshold: usize, window: usize) -> MemoryCompressor {
        MemoryCompressor {
            threshold,
            window,
            max_chars: 500,
            summary_provider: None,
        }
    }

    #[test]
    fn threshold_gates_compression() {
        let c = compressor(10, 5);
        assert!(!c.should_compress(9));
        assert!(c.should_compress(10));
        assert!(!compressor(0, 5).should_compress(100));
    }

    #[test]
    fn select_skips_summaries_and_requires_full_window() {
        let c = compressor(4, 3);
        let mut records: Vec<MemoryRecord> = (0..4)
            .map(|i| MemoryRecord::new("s1", "user", format!("message {i}")))
            .collect();
        records[0]
            .metadata
            .insert("summary".into(), Value::from(true));

        let selected = c.select_records(&records);
        assert_eq!(selected.len(), 3);
        assert!(selected.iter().all(|r| !r.is_summary()));

        // Two non-summary records cannot fill a window of three.
        let short: Vec<MemoryRecord> = records.into_iter().take(3).collect();
        assert!(c.select_records(&short).is_empty());
    }

    #[tokio::test]
    async fn local_summary_carries_source_metadata() {
        let c = compressor(2, 2);
        let records: Vec<MemoryRecord> = (0..2)
            .map(|i| MemoryRecord::new("s1", "user", format!("memory number {i}")))
            .collect();
        let summary = c.compress(&records).await.unwrap();

        assert_eq!(summary.role, "system");
        assert_eq!(summary.session_id, "s1");
        assert!(summary.content.starts_with("Memory Summary:"));
        assert!(summary.is_summary());
        let source_ids = summary.metadata["source_ids"].as_array().unwrap();
        assert_eq!(source_ids.len(), 2);
        assert_eq!(summary.metadata["source_count"], 2);
        assert_eq!(summary.metadata["created_by"], "memory_compressor");
        assert!(summary.metadata.contains_key("source_first_at"));
        assert!(summary.metadata.contains_key("source_last_at"));
    }

    #[tokio::test]
    async fn empty_input_yields_none() {
        assert!(compressor(2, 2).compress(&[]).await.is_none());
    }
}
