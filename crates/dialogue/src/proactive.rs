//! Proactive chat scheduling: per-session inactivity timers with
//! quiet-hour backoff and persistent state.
//!
//! State lives under `proactive.sessions.<session_id>` in the state store,
//! so pending triggers survive restarts. Timer tasks are cancel-safe: a new
//! schedule aborts the previous task for the session.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use chrono::Utc;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;

use cerise_domain::config::{ProactiveChatConfig, ProactiveSessionConfig};
use cerise_domain::error::Result;
use cerise_events::{contracts, handler, MessageBus};
use cerise_state::StateStore;

use crate::engine::{ChatOverrides, DialogueEngine};
use crate::proactive_time::{is_quiet_time, next_quiet_end, parse_quiet_hours};

const STATE_KEY: &str = "proactive.sessions";

/// Persisted per-session scheduling state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProactiveSessionState {
    /// Unix seconds of the last user message.
    #[serde(default)]
    pub last_user_at: Option<f64>,
    #[serde(default)]
    pub unanswered_count: u32,
    /// Unix seconds of the armed trigger, if any.
    #[serde(default)]
    pub next_trigger_at: Option<f64>,
}

pub struct ProactiveChatService {
    bus: Arc<MessageBus>,
    dialogue: Arc<DialogueEngine>,
    config: ProactiveChatConfig,
    state: StateStore,
    tasks: Mutex<HashMap<String, tokio::task::JoinHandle<()>>>,
    timezone: Option<chrono_tz::Tz>,
}

impl ProactiveChatService {
    pub fn new(
        bus: Arc<MessageBus>,
        dialogue: Arc<DialogueEngine>,
        config: ProactiveChatConfig,
        state: StateStore,
    ) -> Arc<Self> {
        let timezone = match config.timezone.as_str() {
            "" => None,
            name => match name.parse::<chrono_tz::Tz>() {
                Ok(tz) => Some(tz),
                Err(_) => {
                    tracing::warn!(timezone = name, "invalid timezone, using local time");
                    None
                }
            },
        };
        Arc::new(Self {
            bus,
            dialogue,
            config,
            state,
            tasks: Mutex::new(HashMap::new()),
            timezone,
        })
    }

    /// Subscribe to user-message events. No-op when disabled.
    pub fn attach(self: &Arc<Self>) -> Result<()> {
        if !self.config.enabled {
            return Ok(());
        }
        let service = Arc::clone(self);
        self.bus.subscribe(
            contracts::DIALOGUE_USER_MESSAGE,
            handler(move |event| {
                let service = Arc::clone(&service);
                async move {
                    if let Some(session_id) = event.data.get("session_id").and_then(Value::as_str)
                    {
                        service.handle_user_message(session_id).await?;
                    }
                    Ok(())
                }
            }),
        )?;
        Ok(())
    }

    /// Restore pending triggers and arm auto-triggers for idle sessions.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        if !self.config.enabled {
            return Ok(());
        }
        self.restore_schedules().await?;
        self.schedule_auto_triggers().await?;
        Ok(())
    }

    pub async fn shutdown(&self) {
        let mut tasks = self.tasks.lock().await;
        for (_, task) in tasks.drain() {
            task.abort();
        }
    }

    pub async fn session_state(&self, session_id: &str) -> ProactiveSessionState {
        self.get_state(session_id).await
    }

    async fn handle_user_message(self: &Arc<Self>, session_id: &str) -> Result<()> {
        let Some(session_config) = self.config.session_config(session_id) else {
            return Ok(());
        };
        let now = Utc::now().timestamp() as f64;
        let mut state = self.get_state(session_id).await;
        state.last_user_at = Some(now);
        state.unanswered_count = 0;
        self.set_state(session_id, &state).await?;
        self.schedule_next(session_id, &session_config).await?;
        Ok(())
    }

    async fn restore_schedules(self: &Arc<Self>) -> Result<()> {
        let stored = self
            .state
            .get(STATE_KEY)
            .await
            .and_then(|v| v.as_object().cloned())
            .unwrap_or_default();
        let now = Utc::now().timestamp() as f64;
        for (session_id, raw) in stored {
            if self.config.session_config(&session_id).is_none() {
                continue;
            }
            let state: ProactiveSessionState =
                serde_json::from_value(raw).unwrap_or_default();
            if let Some(trigger_at) = state.next_trigger_at {
                if trigger_at > now {
                    self.schedule_task(&session_id, trigger_at - now, trigger_at)
                        .await;
                }
            }
        }
        Ok(())
    }

    async fn schedule_auto_triggers(self: &Arc<Self>) -> Result<()> {
        if !self.config.auto_trigger.enabled {
            return Ok(());
        }
        let delay = self.config.auto_trigger.after_minutes.saturating_mul(60) as f64;
        if delay <= 0.0 {
            return Ok(());
        }
        for session_id in self.config.enabled_session_ids() {
            let state = self.get_state(&session_id).await;
            if state.last_user_at.is_some() || state.next_trigger_at.is_some() {
                continue;
            }
            let trigger_at = Utc::now().timestamp() as f64 + delay;
            let mut state = state;
            state.next_trigger_at = Some(trigger_at);
            self.set_state(&session_id, &state).await?;
            self.schedule_task(&session_id, delay, trigger_at).await;
        }
        Ok(())
    }

    async fn schedule_next(
        self: &Arc<Self>,
        session_id: &str,
        config: &ProactiveSessionConfig,
    ) -> Result<()> {
        let delay = compute_delay_seconds(config);
        if delay <= 0.0 {
            return Ok(());
        }
        let trigger_at = Utc::now().timestamp() as f64 + delay;
        let mut state = self.get_state(session_id).await;
        state.next_trigger_at = Some(trigger_at);
        self.set_state(session_id, &state).await?;
        self.schedule_task(session_id, delay, trigger_at).await;
        Ok(())
    }

    /// Arm (or re-arm) the timer task for a session.
    fn schedule_task<'a>(
        self: &'a Arc<Self>,
        session_id: &'a str,
        delay: f64,
        trigger_at: f64,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        Box::pin(async move {
            let service = Arc::clone(self);
            let session = session_id.to_string();
            let mut tasks = self.tasks.lock().await;
            if let Some(previous) = tasks.remove(&session) {
                previous.abort();
            }
            tasks.insert(
                session.clone(),
                tokio::spawn(async move {
                    tokio::time::sleep(std::time::Duration::from_secs_f64(delay.max(0.0))).await;
                    if let Err(e) = service.trigger_session(&session, trigger_at).await {
                        tracing::error!(session_id = %session, error = %e, "proactive trigger failed");
                    }
                }),
            );
        })
    }

    async fn trigger_session(self: &Arc<Self>, session_id: &str, trigger_at: f64) -> Result<()> {
        let Some(session_config) = self.config.session_config(session_id) else {
            return Ok(());
        };
        let state = self.get_state(session_id).await;
        // A newer schedule superseded this timer.
        if let Some(current) = state.next_trigger_at {
            if (current - trigger_at).abs() > 1.0 {
                return Ok(());
            }
        }
        let max_unanswered = session_config.schedule.max_unanswered_times;
        if max_unanswered > 0 && state.unanswered_count >= max_unanswered {
            tracing::debug!(
                session_id,
                unanswered = state.unanswered_count,
                "proactive trigger suppressed: unanswered cap reached"
            );
            return Ok(());
        }

        if let Some(quiet_delay) = self.seconds_until_quiet_end(&session_config) {
            tracing::debug!(session_id, quiet_delay, "inside quiet hours, rescheduling");
            let next_at = Utc::now().timestamp() as f64 + quiet_delay;
            let mut state = state;
            state.next_trigger_at = Some(next_at);
            self.set_state(session_id, &state).await?;
            self.schedule_task(session_id, quiet_delay, next_at).await;
            return Ok(());
        }

        let prompt = build_prompt(&session_config, &state, self.now_string());
        let overrides = ChatOverrides {
            provider_id: (!session_config.provider_id.is_empty())
                .then(|| session_config.provider_id.clone()),
            model: (!session_config.model.is_empty()).then(|| session_config.model.clone()),
            temperature: Some(session_config.temperature),
            max_tokens: Some(session_config.max_tokens),
            use_tools: Some(false),
        };
        match self
            .dialogue
            .proactive_chat(session_id, &prompt, overrides)
            .await
        {
            Ok(_) => {
                let mut state = self.get_state(session_id).await;
                state.unanswered_count += 1;
                self.set_state(session_id, &state).await?;
                self.schedule_next(session_id, &session_config).await?;
            }
            Err(e) => {
                tracing::error!(session_id, error = %e, "proactive chat failed");
            }
        }
        Ok(())
    }

    /// Seconds until the quiet window ends, when currently inside one.
    fn seconds_until_quiet_end(&self, config: &ProactiveSessionConfig) -> Option<f64> {
        let (start, end) = parse_quiet_hours(&config.schedule.quiet_hours)?;
        match self.timezone {
            Some(tz) => {
                let now = Utc::now().with_timezone(&tz);
                if !is_quiet_time(&now, start, end) {
                    return None;
                }
                let quiet_end = next_quiet_end(&now, start, end);
                Some((quiet_end - now).num_milliseconds() as f64 / 1000.0)
            }
            None => {
                let now = chrono::Local::now();
                if !is_quiet_time(&now, start, end) {
                    return None;
                }
                let quiet_end = next_quiet_end(&now, start, end);
                Some((quiet_end - now).num_milliseconds() as f64 / 1000.0)
            }
        }
    }

    fn now_string(&self) -> String {
        match self.timezone {
            Some(tz) => Utc::now().with_timezone(&tz).format("%Y-%m-%d %H:%M").to_string(),
            None => chrono::Local::now().format("%Y-%m-%d %H:%M").to_string(),
        }
    }

    async fn get_state(&self, session_id: &str) -> ProactiveSessionState {
        self.state
            .get(&format!("{STATE_KEY}.{session_id}"))
            .await
            .and_then(|raw| serde_json::from_value(raw).ok())
            .unwrap_or_default()
    }

    async fn set_state(&self, session_id: &str, state: &ProactiveSessionState) -> Result<()> {
        self.state
            .set(
                &format!("{STATE_KEY}.{session_id}"),
                serde_json::to_value(state)?,
            )
            .await
    }
}

fn compute_delay_seconds(config: &ProactiveSessionConfig) -> f64 {
    let min_seconds = config.schedule.min_interval_minutes.saturating_mul(60);
    let max_seconds = config.schedule.max_interval_minutes.saturating_mul(60);
    if max_seconds == 0 {
        return 0.0;
    }
    let min_seconds = min_seconds.min(max_seconds);
    rand::thread_rng().gen_range(min_seconds..=max_seconds) as f64
}

fn build_prompt(
    config: &ProactiveSessionConfig,
    state: &ProactiveSessionState,
    current_time: String,
) -> String {
    config
        .prompt
        .replace("{{current_time}}", &current_time)
        .replace("{{unanswered_count}}", &state.unanswered_count.to_string())
}

#[cfg(test)]
mod tests {
    use cerise_domain::config::DialogueConfig;
    use cerise_providers::testing::StaticProvider;
    use cerise_providers::ProviderRegistry;

    use super::*;

    fn config(min: u64, max: u64) -> ProactiveChatConfig {
        let mut config = ProactiveChatConfig {
            enabled: true,
            apply_to_all_sessions: true,
            ..Default::default()
        };
        config.schedule.min_interval_minutes = min;
        config.schedule.max_interval_minutes = max;
        config.schedule.quiet_hours = String::new();
        config.schedule.max_unanswered_times = 2;
        config
    }

    async fn service_with(
        config: ProactiveChatConfig,
    ) -> (Arc<ProactiveChatService>, Arc<MessageBus>) {
        let bus = Arc::new(MessageBus::new());
        let providers = Arc::new(ProviderRegistry::new());
        providers.insert("stub", Arc::new(StaticProvider::new("stub", "hey!")));
        let dialogue = Arc::new(
            DialogueEngine::new(DialogueConfig::default(), providers).with_bus(Arc::clone(&bus)),
        );
        let service = ProactiveChatService::new(
            Arc::clone(&bus),
            dialogue,
            config,
            StateStore::in_memory(),
        );
        service.attach().unwrap();
        bus.start().await;
        (service, bus)
    }

    #[tokio::test]
    async fn user_message_arms_schedule() {
        let (service, bus) = service_with(config(1, 1)).await;
        let before = Utc::now().timestamp() as f64;

        bus.emit(
            contracts::DIALOGUE_USER_MESSAGE,
            contracts::build_dialogue_user_message("s1", "hello"),
            "test",
        )
        .await
        .unwrap();
        bus.wait_empty().await;

        let state = service.session_state("s1").await;
        assert_eq!(state.unanswered_count, 0);
        let last_user_at = state.last_user_at.unwrap();
        assert!(last_user_at >= before - 1.0);
        // min = max = 1 minute: the trigger is exactly 60s after the message.
        let trigger_at = state.next_trigger_at.unwrap();
        assert!((trigger_at - last_user_at - 60.0).abs() <= 1.0);
        assert_eq!(service.tasks.lock().await.len(), 1);

        service.shutdown().await;
        bus.stop().await;
    }

    #[tokio::test]
    async fn sessions_outside_allowlist_are_ignored() {
        let mut cfg = config(1, 1);
        cfg.apply_to_all_sessions = false;
        cfg.session_allowlist = vec!["allowed".into()];
        let (service, bus) = service_with(cfg).await;

        bus.emit(
            contracts::DIALOGUE_USER_MESSAGE,
            contracts::build_dialogue_user_message("other", "hello"),
            "test",
        )
        .await
        .unwrap();
        bus.wait_empty().await;

        assert!(service.session_state("other").await.last_user_at.is_none());
        assert!(service.tasks.lock().await.is_empty());
        service.shutdown().await;
        bus.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn trigger_fires_and_reschedules() {
        let (service, bus) = service_with(config(1, 1)).await;
        bus.emit(
            contracts::DIALOGUE_USER_MESSAGE,
            contracts::build_dialogue_user_message("s1", "hello"),
            "test",
        )
        .await
        .unwrap();
        bus.wait_empty().await;

        tokio::time::advance(std::time::Duration::from_secs(61)).await;
        // Let the timer task and its follow-up scheduling run.
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
        bus.wait_empty().await;

        let state = service.session_state("s1").await;
        assert_eq!(state.unanswered_count, 1);
        assert!(state.next_trigger_at.is_some());
        service.shutdown().await;
        bus.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn unanswered_cap_blocks_trigger_without_rearming() {
        let (service, bus) = service_with(config(1, 1)).await;
        // Pretend two proactive messages already went unanswered.
        service
            .set_state(
                "s1",
                &ProactiveSessionState {
                    last_user_at: Some(Utc::now().timestamp() as f64),
                    unanswered_count: 2,
                    next_trigger_at: None,
                },
            )
            .await
            .unwrap();
        let session_config = service.config.session_config("s1").unwrap();
        service.schedule_next("s1", &session_config).await.unwrap();

        tokio::time::advance(std::time::Duration::from_secs(61)).await;
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }

        let state = service.session_state("s1").await;
        // Cap was reached: count unchanged and no new timer armed.
        assert_eq!(state.unanswered_count, 2);
        assert!(service.tasks.lock().await.len() <= 1);
        service.shutdown().await;
        bus.stop().await;
    }

    #[tokio::test]
    async fn restore_rearms_future_triggers_only() {
        let store = StateStore::in_memory();
        let future_at = Utc::now().timestamp() as f64 + 120.0;
        store
            .set(
                "proactive.sessions.future",
                serde_json::json!({ "next_trigger_at": future_at, "unanswered_count": 0 }),
            )
            .await
            .unwrap();
        store
            .set(
                "proactive.sessions.past",
                serde_json::json!({ "next_trigger_at": 1.0, "unanswered_count": 0 }),
            )
            .await
            .unwrap();

        let bus = Arc::new(MessageBus::new());
        let providers = Arc::new(ProviderRegistry::new());
        providers.insert("stub", Arc::new(StaticProvider::new("stub", "hey!")));
        let dialogue =
            Arc::new(DialogueEngine::new(DialogueConfig::default(), providers));
        let service =
            ProactiveChatService::new(Arc::clone(&bus), dialogue, config(1, 1), store);
        service.start().await.unwrap();

        let tasks = service.tasks.lock().await;
        assert!(tasks.contains_key("future"));
        assert!(!tasks.contains_key("past"));
        drop(tasks);
        service.shutdown().await;
    }

    #[test]
    fn prompt_substitutions() {
        let config = ProactiveChatConfig::default();
        let session = ProactiveSessionConfig {
            session_id: "s1".into(),
            enabled: true,
            prompt: "time={{current_time}} count={{unanswered_count}}".into(),
            provider_id: String::new(),
            model: String::new(),
            temperature: 0.7,
            max_tokens: 512,
            schedule: config.schedule.clone(),
            auto_trigger: config.auto_trigger.clone(),
        };
        let state = ProactiveSessionState {
            unanswered_count: 3,
            ..Default::default()
        };
        let prompt = build_prompt(&session, &state, "2025-06-15 10:00".into());
        assert_eq!(prompt, "time=2025-06-15 10:00 count=3");
    }
}
