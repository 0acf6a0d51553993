use std::pin::Pin;

use cerise_domain::error::{Error, Result};
use cerise_domain::tool::Message;

/// Boxed stream of text chunks from a streaming chat call.
pub type TextStream = Pin<Box<dyn futures_core::Stream<Item = Result<String>> + Send>>;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request / Response types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Options for a chat completion call.
#[derive(Debug, Clone)]
pub struct ChatOptions {
    pub model: String,
    pub temperature: f64,
    pub max_tokens: u32,
    pub top_p: f64,
    pub stop: Option<Vec<String>>,
    /// Tool schemas the model may invoke (OpenAI function format).
    pub tools: Option<Vec<serde_json::Value>>,
}

impl Default for ChatOptions {
    fn default() -> Self {
        Self {
            model: String::new(),
            temperature: 0.7,
            max_tokens: 2048,
            top_p: 1.0,
            stop: None,
            tools: None,
        }
    }
}

impl ChatOptions {
    pub fn for_model(model: impl Into<String>) -> Self {
        Self { model: model.into(), ..Default::default() }
    }
}

/// Token usage reported by a provider.
#[derive(Debug, Clone, Copy, Default)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

/// A provider-agnostic chat completion response.
#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub content: String,
    pub model: String,
    pub usage: Usage,
    pub tool_calls: Vec<cerise_domain::tool::ToolCall>,
    /// `"stop"`, `"tool_calls"`, `"length"`, ...
    pub finish_reason: String,
}

impl ChatResponse {
    pub fn text(content: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            model: model.into(),
            usage: Usage::default(),
            tool_calls: Vec::new(),
            finish_reason: "stop".into(),
        }
    }
}

/// Capabilities a provider/model combination advertises.
#[derive(Debug, Clone, Copy)]
pub struct ProviderCapabilities {
    pub chat: bool,
    pub streaming: bool,
    pub function_calling: bool,
    pub vision: bool,
    pub embeddings: bool,
    pub rerank: bool,
    pub max_context_length: u32,
}

impl Default for ProviderCapabilities {
    fn default() -> Self {
        Self {
            chat: true,
            streaming: true,
            function_calling: false,
            vision: false,
            embeddings: false,
            rerank: false,
            max_context_length: 4096,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Core provider trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Trait every LLM adapter must implement.
///
/// The core treats providers as an interface contract; concrete HTTP adapters
/// live outside this workspace and are registered through builder functions
/// on the [`crate::ProviderRegistry`].
#[async_trait::async_trait]
pub trait Provider: Send + Sync {
    /// Provider identifier (type-level, e.g. `"openai"`).
    fn name(&self) -> &str;

    fn available_models(&self) -> Vec<String>;

    async fn chat(&self, messages: Vec<Message>, options: ChatOptions) -> Result<ChatResponse>;

    async fn stream_chat(
        &self,
        messages: Vec<Message>,
        options: ChatOptions,
    ) -> Result<TextStream>;

    fn capabilities(&self) -> ProviderCapabilities;

    async fn health_check(&self) -> bool {
        true
    }

    /// Optional: embedding endpoint.
    async fn embed(&self, _texts: Vec<String>, _model: Option<String>) -> Result<Vec<Vec<f32>>> {
        Err(Error::FailedPrecondition(format!(
            "provider '{}' does not support embeddings",
            self.name()
        )))
    }

    /// Optional: rerank endpoint. Returns `(document_index, score)` pairs.
    async fn rerank(
        &self,
        _query: String,
        _documents: Vec<String>,
        _model: Option<String>,
        _top_k: Option<usize>,
    ) -> Result<Vec<(usize, f32)>> {
        Err(Error::FailedPrecondition(format!(
            "provider '{}' does not support rerank",
            self.name()
        )))
    }
}
