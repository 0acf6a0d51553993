//! Dialogue engine: prompt composition and the iterative tool-call loop.
//!
//! Per turn the engine prepends persona, layered memory context, and a skill
//! block as system messages, then loops provider call → tool dispatch until
//! the model stops requesting tools or the round cap is hit.
//! `dialogue.user_message` fires before the first provider call and
//! `dialogue.assistant_response` after the loop terminates.

use std::sync::Arc;

use serde_json::Value;

use cerise_abilities::CapabilityScheduler;
use cerise_domain::ability::AbilityContext;
use cerise_domain::config::DialogueConfig;
use cerise_domain::error::Result;
use cerise_domain::tool::{Message, ToolCall};
use cerise_events::{contracts, Event, MessageBus};
use cerise_memory::{MemoryContextBuilder, MemoryEngine};
use cerise_providers::{ChatOptions, ChatResponse, Provider, ProviderRegistry};
use cerise_skills::SkillService;

use crate::session::{Session, SessionManager};

/// Hard cap on provider→tool→provider rounds in one turn.
const MAX_TOOL_ROUNDS: usize = 5;

/// Per-call overrides for [`DialogueEngine::chat`].
#[derive(Debug, Clone, Default)]
pub struct ChatOverrides {
    pub provider_id: Option<String>,
    pub model: Option<String>,
    pub temperature: Option<f64>,
    pub max_tokens: Option<u32>,
    /// `Some(false)` disables tool calling for this turn.
    pub use_tools: Option<bool>,
}

pub struct DialogueEngine {
    config: DialogueConfig,
    providers: Arc<ProviderRegistry>,
    scheduler: Option<Arc<CapabilityScheduler>>,
    memory: Option<Arc<MemoryEngine>>,
    context_builder: Option<Arc<MemoryContextBuilder>>,
    skills: Option<Arc<SkillService>>,
    bus: Option<Arc<MessageBus>>,
    sessions: SessionManager,
    /// Permissions granted to tool executions started from dialogue.
    tool_permissions: Vec<String>,
}

impl DialogueEngine {
    pub fn new(config: DialogueConfig, providers: Arc<ProviderRegistry>) -> Self {
        Self {
            config,
            providers,
            scheduler: None,
            memory: None,
            context_builder: None,
            skills: None,
            bus: None,
            sessions: SessionManager::new(),
            tool_permissions: Vec::new(),
        }
    }

    pub fn with_scheduler(mut self, scheduler: Arc<CapabilityScheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    pub fn with_memory(
        mut self,
        memory: Arc<MemoryEngine>,
        context_builder: Arc<MemoryContextBuilder>,
    ) -> Self {
        self.memory = Some(memory);
        self.context_builder = Some(context_builder);
        self
    }

    pub fn with_skills(mut self, skills: Arc<SkillService>) -> Self {
        self.skills = Some(skills);
        self
    }

    pub fn with_bus(mut self, bus: Arc<MessageBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn with_tool_permissions(mut self, permissions: Vec<String>) -> Self {
        self.tool_permissions = permissions;
        self
    }

    pub fn create_session(&self, session_id: Option<&str>) -> Session {
        self.sessions.create_session(session_id)
    }

    pub fn get_session(&self, session_id: &str) -> Option<Session> {
        self.sessions.get_session(session_id)
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    /// Run one user turn and return the assistant's reply.
    ///
    /// Provider failure never surfaces as an error: the user gets a short
    /// non-empty explanation string instead.
    pub async fn chat(
        &self,
        session_id: &str,
        user_message: &str,
        overrides: ChatOverrides,
    ) -> Result<String> {
        self.sessions.create_session(Some(session_id));
        self.sessions
            .append_message(session_id, Message::user(user_message));

        self.emit(
            contracts::DIALOGUE_USER_MESSAGE,
            contracts::build_dialogue_user_message(session_id, user_message),
        )
        .await;

        if let Some(memory) = &self.memory {
            if let Err(e) = memory
                .ingest_message(session_id, "user", user_message, None)
                .await
            {
                tracing::error!(error = %e, "failed to ingest user turn");
            }
        }

        let system_messages = self.compose_system_messages(session_id, user_message).await;
        let (reply, model) = self
            .run_tool_loop(session_id, system_messages, &overrides)
            .await;

        self.sessions
            .append_message(session_id, Message::assistant(&reply));
        if let Some(memory) = &self.memory {
            if let Err(e) = memory
                .ingest_message(session_id, "assistant", &reply, None)
                .await
            {
                tracing::error!(error = %e, "failed to ingest assistant turn");
            }
        }

        self.emit(
            contracts::DIALOGUE_ASSISTANT_RESPONSE,
            contracts::build_dialogue_assistant_response(session_id, &reply, &model),
        )
        .await;
        Ok(reply)
    }

    /// Self-initiated message: injects `prompt` as a system task, skips tool
    /// calling, and emits only the assistant-response event.
    pub async fn proactive_chat(
        &self,
        session_id: &str,
        prompt: &str,
        overrides: ChatOverrides,
    ) -> Result<String> {
        self.sessions.create_session(Some(session_id));

        let mut messages = self.compose_system_messages(session_id, prompt).await;
        messages.extend(self.sessions.messages(session_id));
        messages.push(Message::system(prompt));

        let provider = self.resolve_provider(&overrides);
        let options = self.chat_options(&overrides, None);
        let model = options.model.clone();
        let reply = match provider {
            Some(provider) => match provider.chat(messages, options).await {
                Ok(response) => response.content,
                Err(e) => {
                    tracing::error!(error = %e, "proactive chat provider call failed");
                    return Err(e);
                }
            },
            None => {
                return Err(cerise_domain::error::Error::FailedPrecondition(
                    "no provider configured".into(),
                ))
            }
        };

        self.sessions
            .append_message(session_id, Message::assistant(&reply));
        if let Some(memory) = &self.memory {
            if let Err(e) = memory
                .ingest_message(session_id, "assistant", &reply, None)
                .await
            {
                tracing::error!(error = %e, "failed to ingest proactive turn");
            }
        }
        self.emit(
            contracts::DIALOGUE_ASSISTANT_RESPONSE,
            contracts::build_dialogue_assistant_response(session_id, &reply, &model),
        )
        .await;
        Ok(reply)
    }

    // ── Prompt composition ─────────────────────────────────────────

    async fn compose_system_messages(&self, session_id: &str, query: &str) -> Vec<Message> {
        let mut messages = Vec::new();
        if !self.config.persona.is_empty() {
            messages.push(Message::system(&self.config.persona));
        }

        if let (Some(memory), Some(builder)) = (&self.memory, &self.context_builder) {
            match memory
                .recall(query, self.config.memory_recall_limit, Some(session_id))
                .await
            {
                Ok(results) => match builder.build(&results, Some(session_id)).await {
                    Ok(context) if !context.is_empty() => {
                        messages.push(Message::system(context));
                    }
                    Ok(_) => {}
                    Err(e) => tracing::error!(error = %e, "memory context assembly failed"),
                },
                Err(e) => {
                    // Degraded mode: continue without recall context.
                    tracing::error!(error = %e, "memory recall failed");
                }
            }
        }

        if let Some(skills) = &self.skills {
            let relevant = skills.search(query, self.config.skill_top_k).await;
            let block = SkillService::build_injection_block(&relevant);
            if !block.is_empty() {
                messages.push(Message::system(block));
            }
        }
        messages
    }

    // ── Tool loop ──────────────────────────────────────────────────

    async fn run_tool_loop(
        &self,
        session_id: &str,
        system_messages: Vec<Message>,
        overrides: &ChatOverrides,
    ) -> (String, String) {
        let Some(provider) = self.resolve_provider(overrides) else {
            return ("I cannot respond right now: no language model provider is configured.".into(), String::new());
        };

        let use_tools = overrides.use_tools.unwrap_or(self.config.use_tools)
            && provider.capabilities().function_calling;
        let tool_schemas = if use_tools {
            self.scheduler
                .as_ref()
                .map(|scheduler| scheduler.get_tool_schemas())
                .filter(|schemas| !schemas.is_empty())
        } else {
            None
        };

        let mut conversation = system_messages;
        conversation.extend(self.sessions.messages(session_id));

        let mut last_error: Option<String> = None;
        for round in 0..MAX_TOOL_ROUNDS {
            let options = self.chat_options(overrides, tool_schemas.clone());
            let response = match provider.chat(conversation.clone(), options).await {
                Ok(response) => response,
                Err(e) => {
                    tracing::error!(error = %e, round, "provider call failed");
                    last_error = Some(e.to_string());
                    break;
                }
            };

            if response.tool_calls.is_empty() {
                return (ensure_reply(response.content), response.model);
            }

            let ChatResponse {
                content,
                tool_calls,
                model,
                ..
            } = response;
            conversation.push(Message::assistant_tool_calls(content, tool_calls.clone()));
            let any_failed = self
                .dispatch_tool_calls(session_id, &tool_calls, &model, &mut conversation)
                .await;
            if any_failed {
                conversation.push(Message::system(
                    "Note: one or more tool calls failed. Review the tool results and either retry differently or answer without them.",
                ));
            }
        }

        match last_error {
            Some(error) => (
                format!("I ran into a problem answering that: {error}"),
                String::new(),
            ),
            None => (
                "I could not finish the requested tool calls within the allowed number of rounds."
                    .into(),
                String::new(),
            ),
        }
    }

    /// Execute each tool call through the scheduler, record a `ToolRun`, and
    /// append the `role=tool` result message. Returns whether any call failed.
    async fn dispatch_tool_calls(
        &self,
        session_id: &str,
        tool_calls: &[ToolCall],
        model: &str,
        conversation: &mut Vec<Message>,
    ) -> bool {
        let mut any_failed = false;
        for call in tool_calls {
            let result = match &self.scheduler {
                Some(scheduler) => {
                    let context = AbilityContext::new("user", session_id)
                        .with_permissions(self.tool_permissions.clone());
                    scheduler
                        .execute(&call.tool_name, call.arguments.clone(), &context)
                        .await
                }
                None => cerise_domain::ability::AbilityResult::err("no ability scheduler wired"),
            };

            let output = result
                .data
                .as_ref()
                .map(value_to_text)
                .unwrap_or_default();
            if let Some(skills) = &self.skills {
                let arguments = call
                    .arguments
                    .as_object()
                    .cloned()
                    .unwrap_or_default();
                if let Err(e) = skills
                    .record_tool_run(
                        session_id,
                        &call.tool_name,
                        Some(&call.call_id),
                        arguments,
                        &self.config.provider_id,
                        model,
                        result.success,
                        &output,
                        result.error.as_deref(),
                    )
                    .await
                {
                    tracing::debug!(error = %e, "failed to record tool run");
                }
            }

            let payload = if result.success {
                serde_json::json!({ "success": true, "data": result.data }).to_string()
            } else {
                any_failed = true;
                serde_json::json!({
                    "success": false,
                    "error": result.error.clone().unwrap_or_else(|| "Error".into()),
                })
                .to_string()
            };
            conversation.push(Message::tool_result(call.call_id.clone(), payload));
        }
        any_failed
    }

    fn resolve_provider(&self, overrides: &ChatOverrides) -> Option<Arc<dyn Provider>> {
        let provider_id = overrides
            .provider_id
            .as_deref()
            .filter(|id| !id.is_empty())
            .or_else(|| (!self.config.provider_id.is_empty()).then_some(self.config.provider_id.as_str()));
        self.providers.resolve(provider_id)
    }

    fn chat_options(
        &self,
        overrides: &ChatOverrides,
        tools: Option<Vec<Value>>,
    ) -> ChatOptions {
        let model = overrides
            .model
            .clone()
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| self.config.model.clone());
        ChatOptions {
            model,
            temperature: overrides.temperature.unwrap_or(self.config.temperature),
            max_tokens: overrides.max_tokens.unwrap_or(self.config.max_tokens),
            top_p: 1.0,
            stop: None,
            tools,
        }
    }

    async fn emit(&self, event_type: &str, data: serde_json::Map<String, Value>) {
        if let Some(bus) = &self.bus {
            if let Err(e) = bus.publish(Event::new(event_type, data, "dialogue")).await {
                tracing::warn!(error = %e, event_type, "failed to publish dialogue event");
            }
        }
    }
}

fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn ensure_reply(content: String) -> String {
    if content.trim().is_empty() {
        "(no response)".into()
    } else {
        content
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use cerise_abilities::AbilityRegistry;
    use cerise_domain::ability::{
        Ability, AbilityCategory, AbilityContext, AbilityResult, AbilityType,
    };
    use cerise_domain::capability::CapabilitiesConfig;
    use cerise_domain::config::DialogueConfig;
    use cerise_providers::testing::StaticProvider;
    use cerise_providers::{ChatResponse, Usage};
    use cerise_state::StateStore;

    use super::*;

    struct CountingEcho {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Ability for CountingEcho {
        fn name(&self) -> &str {
            "echo"
        }
        fn display_name(&self) -> &str {
            "Echo"
        }
        fn description(&self) -> String {
            "Echo back input text.".into()
        }
        fn ability_type(&self) -> AbilityType {
            AbilityType::Builtin
        }
        fn category(&self) -> AbilityCategory {
            AbilityCategory::Utility
        }
        fn parameters_schema(&self) -> Value {
            serde_json::json!({
                "type": "object",
                "properties": { "text": { "type": "string" } },
                "required": ["text"],
            })
        }
        async fn execute(&self, params: Value, _context: &AbilityContext) -> AbilityResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let text = params.get("text").and_then(Value::as_str).unwrap_or("");
            AbilityResult::ok(format!("echo:{text}"))
        }
    }

    fn tool_call_response(model: &str) -> ChatResponse {
        ChatResponse {
            content: String::new(),
            model: model.into(),
            usage: Usage::default(),
            tool_calls: vec![ToolCall {
                call_id: "call-1".into(),
                tool_name: "echo".into(),
                arguments: serde_json::json!({ "text": "hi" }),
            }],
            finish_reason: "tool_calls".into(),
        }
    }

    fn scheduler_with_echo(calls: Arc<AtomicUsize>) -> Arc<CapabilityScheduler> {
        let registry = Arc::new(AbilityRegistry::new());
        registry.register(Arc::new(CountingEcho { calls }));
        Arc::new(CapabilityScheduler::new(
            registry,
            CapabilitiesConfig::default(),
            None,
        ))
    }

    #[tokio::test]
    async fn plain_chat_echoes_and_tracks_session() {
        let providers = Arc::new(ProviderRegistry::new());
        providers.insert("stub", Arc::new(StaticProvider::echo("stub")));
        let engine = DialogueEngine::new(DialogueConfig::default(), providers);

        let reply = engine
            .chat("s1", "hello there", ChatOverrides::default())
            .await
            .unwrap();
        assert_eq!(reply, "echo:hello there");

        let session = engine.get_session("s1").unwrap();
        assert_eq!(session.messages.len(), 2);
    }

    #[tokio::test]
    async fn tool_loop_executes_and_feeds_back() {
        let providers = Arc::new(ProviderRegistry::new());
        providers.insert(
            "stub",
            Arc::new(
                StaticProvider::new("stub", "final answer")
                    .with_function_calling()
                    .with_script(vec![
                        tool_call_response("static-1"),
                        ChatResponse::text("done after tools", "static-1"),
                    ]),
            ),
        );
        let calls = Arc::new(AtomicUsize::new(0));
        let skills = Arc::new(SkillService::new(&StateStore::in_memory()));
        let engine = DialogueEngine::new(DialogueConfig::default(), providers)
            .with_scheduler(scheduler_with_echo(Arc::clone(&calls)))
            .with_skills(Arc::clone(&skills));

        let reply = engine
            .chat("s1", "use the tool", ChatOverrides::default())
            .await
            .unwrap();
        assert_eq!(reply, "done after tools");
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // The tool run was audited.
        let runs = skills.list_tool_runs("s1", None).await;
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].tool_name, "echo");
        assert!(runs[0].success);
        assert_eq!(runs[0].tool_call_id.as_deref(), Some("call-1"));
    }

    #[tokio::test]
    async fn runaway_tool_loop_is_bounded() {
        // Script always returns tool calls: the loop must stop at the cap.
        let responses: Vec<ChatResponse> =
            (0..10).map(|_| tool_call_response("static-1")).collect();
        let providers = Arc::new(ProviderRegistry::new());
        providers.insert(
            "stub",
            Arc::new(
                StaticProvider::new("stub", "never reached")
                    .with_function_calling()
                    .with_script(responses),
            ),
        );
        let calls = Arc::new(AtomicUsize::new(0));
        let engine = DialogueEngine::new(DialogueConfig::default(), providers)
            .with_scheduler(scheduler_with_echo(Arc::clone(&calls)));

        let reply = engine
            .chat("s1", "loop forever", ChatOverrides::default())
            .await
            .unwrap();
        assert!(reply.contains("allowed number of rounds"));
        assert_eq!(calls.load(Ordering::SeqCst), MAX_TOOL_ROUNDS);
    }

    #[tokio::test]
    async fn failed_tool_adds_system_note_and_audit_entry() {
        let providers = Arc::new(ProviderRegistry::new());
        providers.insert(
            "stub",
            Arc::new(
                StaticProvider::new("stub", "x")
                    .with_function_calling()
                    .with_script(vec![
                        ChatResponse {
                            tool_calls: vec![ToolCall {
                                call_id: "c1".into(),
                                tool_name: "missing_tool".into(),
                                arguments: serde_json::json!({}),
                            }],
                            ..ChatResponse::text("", "static-1")
                        },
                        ChatResponse::text("recovered", "static-1"),
                    ]),
            ),
        );
        let registry = Arc::new(AbilityRegistry::new());
        let scheduler = Arc::new(CapabilityScheduler::new(
            registry,
            CapabilitiesConfig::default(),
            None,
        ));
        let skills = Arc::new(SkillService::new(&StateStore::in_memory()));
        let engine = DialogueEngine::new(DialogueConfig::default(), providers)
            .with_scheduler(scheduler)
            .with_skills(Arc::clone(&skills));

        let reply = engine
            .chat("s1", "try it", ChatOverrides::default())
            .await
            .unwrap();
        assert_eq!(reply, "recovered");

        let runs = skills.list_tool_runs("s1", None).await;
        assert_eq!(runs.len(), 1);
        assert!(!runs[0].success);
        assert!(runs[0].error.as_deref().unwrap().contains("not found"));
    }

    #[tokio::test]
    async fn provider_failure_yields_explanation_not_error() {
        // No provider registered at all.
        let providers = Arc::new(ProviderRegistry::new());
        let engine = DialogueEngine::new(DialogueConfig::default(), providers);
        let reply = engine
            .chat("s1", "hello", ChatOverrides::default())
            .await
            .unwrap();
        assert!(!reply.is_empty());
        assert!(reply.contains("no language model provider"));
    }

    #[tokio::test]
    async fn events_fire_in_order() {
        let bus = Arc::new(MessageBus::new());
        let order = Arc::new(parking_lot::Mutex::new(Vec::<String>::new()));
        for event_type in [
            contracts::DIALOGUE_USER_MESSAGE,
            contracts::DIALOGUE_ASSISTANT_RESPONSE,
        ] {
            let order = Arc::clone(&order);
            bus.subscribe(
                event_type,
                cerise_events::handler(move |event| {
                    let order = Arc::clone(&order);
                    async move {
                        order.lock().push(event.event_type);
                        Ok(())
                    }
                }),
            )
            .unwrap();
        }
        bus.start().await;

        let providers = Arc::new(ProviderRegistry::new());
        providers.insert("stub", Arc::new(StaticProvider::echo("stub")));
        let engine =
            DialogueEngine::new(DialogueConfig::default(), providers).with_bus(Arc::clone(&bus));

        engine
            .chat("s1", "hi", ChatOverrides::default())
            .await
            .unwrap();
        bus.wait_empty().await;

        let seen = order.lock().clone();
        assert_eq!(
            seen,
            vec![
                contracts::DIALOGUE_USER_MESSAGE.to_string(),
                contracts::DIALOGUE_ASSISTANT_RESPONSE.to_string(),
            ]
        );
        bus.stop().await;
    }

    #[tokio::test]
    async fn proactive_chat_emits_only_assistant_response() {
        let bus = Arc::new(MessageBus::new());
        let count_user = Arc::new(AtomicUsize::new(0));
        let count_assistant = Arc::new(AtomicUsize::new(0));
        for (event_type, counter) in [
            (contracts::DIALOGUE_USER_MESSAGE, Arc::clone(&count_user)),
            (
                contracts::DIALOGUE_ASSISTANT_RESPONSE,
                Arc::clone(&count_assistant),
            ),
        ] {
            bus.subscribe(
                event_type,
                cerise_events::handler(move |_| {
                    let counter = Arc::clone(&counter);
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    }
                }),
            )
            .unwrap();
        }
        bus.start().await;

        let providers = Arc::new(ProviderRegistry::new());
        providers.insert("stub", Arc::new(StaticProvider::new("stub", "hey, still around?")));
        let engine =
            DialogueEngine::new(DialogueConfig::default(), providers).with_bus(Arc::clone(&bus));

        let reply = engine
            .proactive_chat("s1", "[System Task: Proactive Chat] say hi", ChatOverrides::default())
            .await
            .unwrap();
        assert_eq!(reply, "hey, still around?");
        bus.wait_empty().await;
        assert_eq!(count_user.load(Ordering::SeqCst), 0);
        assert_eq!(count_assistant.load(Ordering::SeqCst), 1);
        bus.stop().await;
    }
}
