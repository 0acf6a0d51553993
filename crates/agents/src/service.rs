//! Agent orchestration: create, send, and the wakeup drain cycle.

use std::sync::Arc;
use std::time::Instant;

use cerise_dialogue::{ChatOverrides, DialogueEngine};
use cerise_domain::error::Result;
use cerise_events::{contracts, Event, MessageBus};
use cerise_state::StateStore;

use crate::models::{Agent, AgentMessage};
use crate::store::AgentStore;

pub struct AgentService {
    store: AgentStore,
    bus: Arc<MessageBus>,
    dialogue: Arc<DialogueEngine>,
}

impl AgentService {
    pub fn new(state: &StateStore, bus: Arc<MessageBus>, dialogue: Arc<DialogueEngine>) -> Self {
        Self {
            store: AgentStore::new(state),
            bus,
            dialogue,
        }
    }

    pub async fn create(
        &self,
        agent_id: Option<&str>,
        parent_id: Option<&str>,
        name: &str,
    ) -> Result<Agent> {
        let id = agent_id
            .map(str::to_string)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let agent = Agent::new(id, parent_id.map(str::to_string), name);
        self.store.upsert_agent(&agent).await?;
        self.bus
            .publish(Event::new(
                contracts::AGENT_CREATED,
                contracts::build_agent_created(&agent.id, agent.parent_id.as_deref(), &agent.name),
                "agent",
            ))
            .await?;
        Ok(agent)
    }

    /// Append to the agent's message log; `user` messages also enqueue to
    /// the inbox for the next wakeup.
    pub async fn send(&self, agent_id: &str, role: &str, content: &str) -> Result<AgentMessage> {
        let message = AgentMessage::new(agent_id, role, content);
        self.store.append_message(agent_id, &message).await?;
        if role == "user" {
            self.store.enqueue_inbox(agent_id, &message).await?;
        }
        self.bus
            .publish(Event::new(
                contracts::AGENT_MESSAGE_CREATED,
                contracts::build_agent_message_created(&message.id, agent_id, role, content),
                "agent",
            ))
            .await?;
        Ok(message)
    }

    /// Drain the inbox and produce one assistant reply. Returns `None` when
    /// the inbox was empty.
    pub async fn wakeup(
        &self,
        agent_id: &str,
        overrides: ChatOverrides,
    ) -> Result<Option<AgentMessage>> {
        let pending = self.store.drain_inbox(agent_id).await?;
        if pending.is_empty() {
            return Ok(None);
        }

        self.bus
            .publish(Event::new(
                contracts::AGENT_WAKEUP_STARTED,
                contracts::build_agent_wakeup_started(agent_id, pending.len()),
                "agent",
            ))
            .await?;

        self.dialogue.create_session(Some(agent_id));
        let user_text = pending
            .iter()
            .map(|message| message.content.as_str())
            .filter(|content| !content.is_empty())
            .collect::<Vec<_>>()
            .join("\n\n");

        let started = Instant::now();
        let overrides = ChatOverrides {
            use_tools: Some(false),
            ..overrides
        };
        let response = self.dialogue.chat(agent_id, &user_text, overrides).await?;
        let duration_ms = started.elapsed().as_secs_f64() * 1000.0;

        let assistant = AgentMessage::new(agent_id, "assistant", &response);
        self.store.append_message(agent_id, &assistant).await?;
        self.bus
            .publish(Event::new(
                contracts::AGENT_MESSAGE_CREATED,
                contracts::build_agent_message_created(
                    &assistant.id,
                    agent_id,
                    &assistant.role,
                    &assistant.content,
                ),
                "agent",
            ))
            .await?;
        self.bus
            .publish(Event::new(
                contracts::AGENT_WAKEUP_COMPLETED,
                contracts::build_agent_wakeup_completed(
                    agent_id,
                    &assistant.id,
                    (duration_ms * 100.0).round() / 100.0,
                ),
                "agent",
            ))
            .await?;
        Ok(Some(assistant))
    }

    pub async fn list_agents(&self) -> Vec<Agent> {
        self.store.list_agents().await
    }

    pub async fn list_messages(&self, agent_id: &str, limit: Option<usize>) -> Vec<AgentMessage> {
        self.store.list_messages(agent_id, limit).await
    }
}

#[cfg(test)]
mod tests {
    use cerise_domain::config::DialogueConfig;
    use cerise_providers::testing::StaticProvider;
    use cerise_providers::ProviderRegistry;

    use super::*;

    async fn setup() -> (AgentService, Arc<MessageBus>, Arc<parking_lot::Mutex<Vec<String>>>) {
        let bus = Arc::new(MessageBus::new());
        let seen = Arc::new(parking_lot::Mutex::new(Vec::<String>::new()));
        {
            let seen = Arc::clone(&seen);
            bus.subscribe(
                "*",
                cerise_events::handler(move |event| {
                    let seen = Arc::clone(&seen);
                    async move {
                        seen.lock().push(event.event_type);
                        Ok(())
                    }
                }),
            )
            .unwrap();
        }
        bus.start().await;

        let providers = Arc::new(ProviderRegistry::new());
        providers.insert("stub", Arc::new(StaticProvider::echo("stub")));
        let dialogue = Arc::new(
            DialogueEngine::new(DialogueConfig::default(), Arc::clone(&providers))
                .with_bus(Arc::clone(&bus)),
        );
        let service = AgentService::new(&StateStore::in_memory(), Arc::clone(&bus), dialogue);
        (service, bus, seen)
    }

    #[tokio::test]
    async fn wakeup_cycle_echoes_and_orders_events() {
        let (service, bus, seen) = setup().await;

        service.create(Some("a1"), None, "worker").await.unwrap();
        service.send("a1", "user", "hi").await.unwrap();
        let reply = service
            .wakeup("a1", ChatOverrides::default())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reply.content, "echo:hi");
        bus.wait_empty().await;

        let events = seen.lock().clone();
        let expected = [
            contracts::AGENT_CREATED,
            contracts::AGENT_MESSAGE_CREATED,
            contracts::AGENT_WAKEUP_STARTED,
            contracts::DIALOGUE_USER_MESSAGE,
            contracts::DIALOGUE_ASSISTANT_RESPONSE,
            contracts::AGENT_MESSAGE_CREATED,
            contracts::AGENT_WAKEUP_COMPLETED,
        ];
        assert_eq!(events, expected.to_vec());

        // The log holds the user message and the assistant reply.
        let messages = service.list_messages("a1", None).await;
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].role, "assistant");
    }

    #[tokio::test]
    async fn wakeup_with_empty_inbox_is_none() {
        let (service, bus, _) = setup().await;
        service.create(Some("a1"), None, "worker").await.unwrap();
        assert!(service
            .wakeup("a1", ChatOverrides::default())
            .await
            .unwrap()
            .is_none());
        bus.stop().await;
    }

    #[tokio::test]
    async fn multiple_pending_messages_join_with_blank_line() {
        let (service, bus, _) = setup().await;
        service.create(Some("a1"), None, "worker").await.unwrap();
        service.send("a1", "user", "first").await.unwrap();
        service.send("a1", "user", "second").await.unwrap();
        // Non-user roles do not enter the inbox.
        service.send("a1", "system", "ignored").await.unwrap();

        let reply = service
            .wakeup("a1", ChatOverrides::default())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reply.content, "echo:first\n\nsecond");
        bus.stop().await;
    }
}
