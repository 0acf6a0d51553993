//! Memory extraction: turn a recorded memory into layered updates.

use async_trait::async_trait;
use serde_json::Value;

use cerise_domain::config::MemoryPipelineConfig;
use cerise_domain::tool::Message;
use cerise_providers::{ChatOptions, ProviderRegistry};

use crate::types::MemoryRecord;

/// Core profile update extracted from a message.
#[derive(Debug, Clone, Default)]
pub struct CoreProfileUpdate {
    pub summary: String,
    pub profile_id: Option<String>,
    pub session_id: Option<String>,
}

/// Semantic fact extracted from a message.
#[derive(Debug, Clone, Default)]
pub struct SemanticFactUpdate {
    pub subject: String,
    pub predicate: String,
    pub object: String,
    pub fact_id: Option<String>,
    pub session_id: Option<String>,
}

/// Procedural habit extracted from a message.
#[derive(Debug, Clone, Default)]
pub struct ProceduralHabitUpdate {
    pub task_type: String,
    pub instruction: String,
    pub habit_id: Option<String>,
    pub session_id: Option<String>,
}

/// Collection of extracted updates.
#[derive(Debug, Clone, Default)]
pub struct MemoryExtraction {
    pub core_updates: Vec<CoreProfileUpdate>,
    pub facts: Vec<SemanticFactUpdate>,
    pub habits: Vec<ProceduralHabitUpdate>,
}

impl MemoryExtraction {
    pub fn is_empty(&self) -> bool {
        self.core_updates.is_empty() && self.facts.is_empty() && self.habits.is_empty()
    }
}

/// Extractor interface for the memory pipeline.
#[async_trait]
pub trait MemoryExtractor: Send + Sync {
    async fn extract(&self, record: &MemoryRecord) -> MemoryExtraction;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Rule-based extractor
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Extract updates from structured metadata (`core_updates`, `facts`,
/// `habits`) and inline hints (`core: …`, `fact: S | P | O`,
/// `habit: type | instruction`).
#[derive(Default)]
pub struct RuleBasedExtractor {
    pub allow_metadata: bool,
    pub allow_inline: bool,
}

impl RuleBasedExtractor {
    pub fn new() -> Self {
        Self {
            allow_metadata: true,
            allow_inline: true,
        }
    }

    fn extract_metadata(&self, record: &MemoryRecord, extraction: &mut MemoryExtraction) {
        for update in list_values(record.metadata.get("core_updates").or_else(|| record.metadata.get("core_update"))) {
            if let Some(core) = parse_core_update(&update, record) {
                extraction.core_updates.push(core);
            }
        }
        if extraction.core_updates.is_empty() {
            if let Some(summary) = record.metadata.get("core_summary").and_then(Value::as_str) {
                extraction.core_updates.push(CoreProfileUpdate {
                    summary: summary.to_string(),
                    profile_id: None,
                    session_id: Some(record.session_id.clone()),
                });
            }
        }

        for fact in list_values(record.metadata.get("facts").or_else(|| record.metadata.get("new_facts"))) {
            if let Some(parsed) = parse_fact(&fact, record) {
                extraction.facts.push(parsed);
            }
        }

        for habit in list_values(record.metadata.get("habits").or_else(|| record.metadata.get("new_habits"))) {
            if let Some(parsed) = parse_habit(&habit, record) {
                extraction.habits.push(parsed);
            }
        }
    }

    fn extract_inline(&self, record: &MemoryRecord, extraction: &mut MemoryExtraction) {
        for line in record.content.lines() {
            let stripped = line.trim();
            if stripped.is_empty() {
                continue;
            }
            let lower = stripped.to_lowercase();
            if let Some(payload) = lower
                .starts_with("core:")
                .then(|| stripped[5..].trim())
                .filter(|p| !p.is_empty())
            {
                extraction.core_updates.push(parse_inline_core(payload, record));
            } else if lower.starts_with("fact:") {
                if let Some(fact) = parse_inline_fact(stripped[5..].trim(), record) {
                    extraction.facts.push(fact);
                }
            } else if lower.starts_with("habit:") {
                if let Some(habit) = parse_inline_habit(stripped[6..].trim(), record) {
                    extraction.habits.push(habit);
                }
            }
        }
    }
}

#[async_trait]
impl MemoryExtractor for RuleBasedExtractor {
    async fn extract(&self, record: &MemoryRecord) -> MemoryExtraction {
        let mut extraction = MemoryExtraction::default();
        if self.allow_metadata {
            self.extract_metadata(record, &mut extraction);
        }
        if self.allow_inline {
            self.extract_inline(record, &mut extraction);
        }
        extraction
    }
}

fn list_values(value: Option<&Value>) -> Vec<Value> {
    match value {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items.clone(),
        Some(other) => vec![other.clone()],
    }
}

fn parse_core_update(update: &Value, record: &MemoryRecord) -> Option<CoreProfileUpdate> {
    if let Some(summary) = update.as_str() {
        let summary = summary.trim();
        if summary.is_empty() {
            return None;
        }
        return Some(CoreProfileUpdate {
            summary: summary.to_string(),
            profile_id: None,
            session_id: Some(record.session_id.clone()),
        });
    }
    let object = update.as_object()?;
    let summary = object
        .get("summary")
        .and_then(Value::as_str)
        .map(str::to_string)
        .or_else(|| build_core_summary(object))?;
    Some(CoreProfileUpdate {
        summary,
        profile_id: object.get("profile_id").and_then(Value::as_str).map(str::to_string),
        session_id: object
            .get("session_id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| Some(record.session_id.clone())),
    })
}

fn build_core_summary(object: &serde_json::Map<String, Value>) -> Option<String> {
    let value = object.get("value").or_else(|| object.get("content"))?;
    let value_text = match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    let prefix: Vec<&str> = [object.get("target"), object.get("field")]
        .into_iter()
        .flatten()
        .filter_map(Value::as_str)
        .collect();
    if prefix.is_empty() {
        Some(value_text)
    } else {
        Some(format!("{}: {value_text}", prefix.join(".")))
    }
}

fn parse_fact(fact: &Value, record: &MemoryRecord) -> Option<SemanticFactUpdate> {
    let object = fact.as_object()?;
    let subject = object.get("subject").or_else(|| object.get("entity"))?.as_str()?;
    let predicate = object
        .get("predicate")
        .or_else(|| object.get("attribute"))?
        .as_str()?;
    let value = object.get("object").or_else(|| object.get("value"))?.as_str()?;
    Some(SemanticFactUpdate {
        subject: subject.to_string(),
        predicate: predicate.to_string(),
        object: value.to_string(),
        fact_id: object.get("fact_id").and_then(Value::as_str).map(str::to_string),
        session_id: object
            .get("session_id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| Some(record.session_id.clone())),
    })
}

fn parse_habit(habit: &Value, record: &MemoryRecord) -> Option<ProceduralHabitUpdate> {
    let object = habit.as_object()?;
    let task_type = object.get("task_type").or_else(|| object.get("type"))?.as_str()?;
    let instruction = object
        .get("instruction")
        .or_else(|| object.get("rule"))?
        .as_str()?;
    Some(ProceduralHabitUpdate {
        task_type: task_type.to_string(),
        instruction: instruction.to_string(),
        habit_id: object.get("habit_id").and_then(Value::as_str).map(str::to_string),
        session_id: object
            .get("session_id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| Some(record.session_id.clone())),
    })
}

fn parse_inline_core(payload: &str, record: &MemoryRecord) -> CoreProfileUpdate {
    if let Some((profile_id, summary)) = payload.split_once('|') {
        let profile_id = profile_id.trim();
        let summary = summary.trim();
        if !profile_id.is_empty() && !summary.is_empty() {
            return CoreProfileUpdate {
                summary: summary.to_string(),
                profile_id: Some(profile_id.to_string()),
                session_id: Some(record.session_id.clone()),
            };
        }
    }
    CoreProfileUpdate {
        summary: payload.to_string(),
        profile_id: None,
        session_id: Some(record.session_id.clone()),
    }
}

fn parse_inline_fact(payload: &str, record: &MemoryRecord) -> Option<SemanticFactUpdate> {
    let parts: Vec<&str> = payload.split('|').map(str::trim).collect();
    if parts.len() < 3 {
        return None;
    }
    Some(SemanticFactUpdate {
        subject: parts[0].to_string(),
        predicate: parts[1].to_string(),
        object: parts[2..].join("|"),
        fact_id: None,
        session_id: Some(record.session_id.clone()),
    })
}

fn parse_inline_habit(payload: &str, record: &MemoryRecord) -> Option<ProceduralHabitUpdate> {
    let (task_type, instruction) = payload.split_once('|')?;
    let task_type = task_type.trim();
    let instruction = instruction.trim();
    if task_type.is_empty() || instruction.is_empty() {
        return None;
    }
    Some(ProceduralHabitUpdate {
        task_type: task_type.to_string(),
        instruction: instruction.to_string(),
        habit_id: None,
        session_id: Some(record.session_id.clone()),
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// LLM extractor
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

const EXTRACTOR_SYSTEM_PROMPT: &str = "Extract durable memory updates from the message. \
Reply with JSON only: {\"core_updates\": [{\"summary\": \"...\"}], \
\"facts\": [{\"subject\": \"...\", \"predicate\": \"...\", \"object\": \"...\"}], \
\"habits\": [{\"task_type\": \"...\", \"instruction\": \"...\"}]}. \
Use empty arrays when nothing applies.";

/// Extractor that asks a chat provider for structured updates.
pub struct LlmExtractor {
    registry: std::sync::Arc<ProviderRegistry>,
    provider_id: String,
    model: Option<String>,
    temperature: f64,
    max_tokens: u32,
}

impl LlmExtractor {
    pub fn new(registry: std::sync::Arc<ProviderRegistry>, config: &MemoryPipelineConfig) -> Self {
        Self {
            registry,
            provider_id: config.llm_provider_id.clone(),
            model: (!config.llm_model.is_empty()).then(|| config.llm_model.clone()),
            temperature: config.llm_temperature,
            max_tokens: config.llm_max_tokens,
        }
    }

    fn parse_response(&self, raw: &str, record: &MemoryRecord) -> MemoryExtraction {
        let Some(parsed) = extract_json(raw) else {
            return MemoryExtraction::default();
        };
        let mut extraction = MemoryExtraction::default();
        for update in list_values(parsed.get("core_updates")) {
            if let Some(core) = parse_core_update(&update, record) {
                extraction.core_updates.push(core);
            }
        }
        for fact in list_values(parsed.get("facts")) {
            if let Some(parsed_fact) = parse_fact(&fact, record) {
                extraction.facts.push(parsed_fact);
            }
        }
        for habit in list_values(parsed.get("habits")) {
            if let Some(parsed_habit) = parse_habit(&habit, record) {
                extraction.habits.push(parsed_habit);
            }
        }
        extraction
    }
}

#[async_trait]
impl MemoryExtractor for LlmExtractor {
    async fn extract(&self, record: &MemoryRecord) -> MemoryExtraction {
        let Some(provider) = self.registry.resolve(Some(&self.provider_id)) else {
            tracing::warn!(provider_id = %self.provider_id, "extractor provider not found");
            return MemoryExtraction::default();
        };
        let Some(model) = self
            .model
            .clone()
            .or_else(|| provider.available_models().into_iter().next())
        else {
            return MemoryExtraction::default();
        };
        let mut options = ChatOptions::for_model(model);
        options.temperature = self.temperature;
        options.max_tokens = self.max_tokens;

        let messages = vec![
            Message::system(EXTRACTOR_SYSTEM_PROMPT),
            Message::user(format!("[{}] {}", record.role, record.content)),
        ];
        match provider.chat(messages, options).await {
            Ok(response) => self.parse_response(&response.content, record),
            Err(e) => {
                tracing::error!(error = %e, "LLM extraction failed");
                MemoryExtraction::default()
            }
        }
    }
}

/// Pull the first JSON object out of a model reply that may carry prose or
/// code fences around it.
fn extract_json(raw: &str) -> Option<Value> {
    let trimmed = raw.trim();
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return Some(value);
    }
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&trimmed[start..=end]).ok()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Composite extractor + builder
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Chains extractors, concatenating their updates.
pub struct CompositeExtractor {
    pub extractors: Vec<Box<dyn MemoryExtractor>>,
}

#[async_trait]
impl MemoryExtractor for CompositeExtractor {
    async fn extract(&self, record: &MemoryRecord) -> MemoryExtraction {
        let mut extraction = MemoryExtraction::default();
        for extractor in &self.extractors {
            let result = extractor.extract(record).await;
            extraction.core_updates.extend(result.core_updates);
            extraction.facts.extend(result.facts);
            extraction.habits.extend(result.habits);
        }
        extraction
    }
}

/// Build the configured extractor (`rule` | `llm` | `composite`).
pub fn build_extractor(
    config: &MemoryPipelineConfig,
    registry: Option<std::sync::Arc<ProviderRegistry>>,
) -> Box<dyn MemoryExtractor> {
    match config.extractor.to_lowercase().as_str() {
        "llm" => match registry {
            Some(registry) if !config.llm_provider_id.is_empty() => {
                Box::new(LlmExtractor::new(registry, config))
            }
            _ => {
                tracing::warn!("LLM extractor selected without provider, using rule extractor");
                Box::new(RuleBasedExtractor::new())
            }
        },
        "composite" => {
            let mut extractors: Vec<Box<dyn MemoryExtractor>> =
                vec![Box::new(RuleBasedExtractor::new())];
            if let Some(registry) = registry {
                if !config.llm_provider_id.is_empty() {
                    extractors.push(Box::new(LlmExtractor::new(registry, config)));
                }
            }
            Box::new(CompositeExtractor { extractors })
        }
        "rule" => Box::new(RuleBasedExtractor::new()),
        other => {
            tracing::warn!(extractor = %other, "unknown extractor, using rule extractor");
            Box::new(RuleBasedExtractor::new())
        }
    }
}
