//! Test doubles shared by downstream crate tests.

use std::collections::VecDeque;

use parking_lot::Mutex;

use cerise_domain::error::Result;
use cerise_domain::tool::{Message, MessageContent, Role};

use crate::traits::{ChatOptions, ChatResponse, Provider, ProviderCapabilities, TextStream};

/// Deterministic provider stub.
///
/// Replies with scripted responses when given; otherwise echoes the last
/// user message as `echo:<text>`. Optionally advertises embeddings (a fixed
/// token-count vector), rerank (reverse order scores), and function calling.
pub struct StaticProvider {
    id: String,
    default_reply: String,
    script: Mutex<VecDeque<ChatResponse>>,
    capabilities: ProviderCapabilities,
    embedding_dim: usize,
}

impl StaticProvider {
    pub fn new(id: &str, default_reply: &str) -> Self {
        Self {
            id: id.to_string(),
            default_reply: default_reply.to_string(),
            script: Mutex::new(VecDeque::new()),
            capabilities: ProviderCapabilities::default(),
            embedding_dim: 0,
        }
    }

    /// Echo provider: replies `echo:<last user message>`.
    pub fn echo(id: &str) -> Self {
        Self::new(id, "")
    }

    pub fn with_script(self, responses: Vec<ChatResponse>) -> Self {
        *self.script.lock() = responses.into();
        self
    }

    pub fn with_function_calling(mut self) -> Self {
        self.capabilities.function_calling = true;
        self
    }

    pub fn with_embeddings(mut self, dim: usize) -> Self {
        self.capabilities.embeddings = true;
        self.embedding_dim = dim;
        self
    }

    pub fn with_rerank(mut self) -> Self {
        self.capabilities.rerank = true;
        self
    }

    fn fallback_reply(&self, messages: &[Message]) -> String {
        if !self.default_reply.is_empty() {
            return self.default_reply.clone();
        }
        let last_user = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.extract_all_text())
            .unwrap_or_default();
        format!("echo:{last_user}")
    }
}

#[async_trait::async_trait]
impl Provider for StaticProvider {
    fn name(&self) -> &str {
        &self.id
    }

    fn available_models(&self) -> Vec<String> {
        vec!["static-1".into()]
    }

    async fn chat(&self, messages: Vec<Message>, options: ChatOptions) -> Result<ChatResponse> {
        if let Some(scripted) = self.script.lock().pop_front() {
            return Ok(scripted);
        }
        let model = if options.model.is_empty() { "static-1".into() } else { options.model };
        Ok(ChatResponse::text(self.fallback_reply(&messages), model))
    }

    async fn stream_chat(
        &self,
        messages: Vec<Message>,
        options: ChatOptions,
    ) -> Result<TextStream> {
        let response = self.chat(messages, options).await?;
        Ok(Box::pin(futures_util_stream_once(response.content)))
    }

    fn capabilities(&self) -> ProviderCapabilities {
        self.capabilities
    }

    async fn embed(&self, texts: Vec<String>, _model: Option<String>) -> Result<Vec<Vec<f32>>> {
        let dim = self.embedding_dim.max(1);
        Ok(texts
            .iter()
            .map(|text| {
                let mut vec = vec![0.0f32; dim];
                for (i, token) in text.split_whitespace().enumerate() {
                    vec[(token.len() + i) % dim] += 1.0;
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

    async fn rerank(
        &self,
        _query: String,
        documents: Vec<String>,
        _model: Option<String>,
        top_k: Option<usize>,
    ) -> Result<Vec<(usize, f32)>> {
        let k = top_k.unwrap_or(documents.len()).min(documents.len());
        // Reverse order: the last candidate scores highest. Lets tests
        // observe that rerank actually reordered results.
        Ok((0..k).map(|i| (i, i as f32 / k.max(1) as f32)).collect())
    }
}

fn futures_util_stream_once(content: String) -> impl futures_core::Stream<Item = Result<String>> {
    futures_util::stream::once(async move { Ok(content) })
}

/// Message content helper used in tests.
pub fn text_of(message: &Message) -> String {
    match &message.content {
        MessageContent::Text(t) => t.clone(),
        other => other.extract_all_text(),
    }
}
