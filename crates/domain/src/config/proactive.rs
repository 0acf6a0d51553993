//! Proactive chat configuration.

use serde::{Deserialize, Serialize};

use super::default_true;

pub const DEFAULT_PROACTIVE_PROMPT: &str = "[System Task: Proactive Chat]\n\
You are initiating a proactive message to the user.\n\
Current time: {{current_time}}.\n\
Unanswered count: {{unanswered_count}}.\n\
Review recent context and send a short, natural opener.";

/// Scheduling rules for proactive chat.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProactiveScheduleConfig {
    #[serde(default = "default_min_interval")]
    pub min_interval_minutes: u64,
    #[serde(default = "default_max_interval")]
    pub max_interval_minutes: u64,
    /// `"HH-HH"` window during which proactive messages are suppressed.
    #[serde(default = "default_quiet_hours")]
    pub quiet_hours: String,
    /// `0` disables the cap.
    #[serde(default = "default_max_unanswered")]
    pub max_unanswered_times: u32,
}

impl Default for ProactiveScheduleConfig {
    fn default() -> Self {
        Self {
            min_interval_minutes: default_min_interval(),
            max_interval_minutes: default_max_interval(),
            quiet_hours: default_quiet_hours(),
            max_unanswered_times: default_max_unanswered(),
        }
    }
}

/// Auto trigger for sessions with no prior activity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProactiveAutoTriggerConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_after_minutes")]
    pub after_minutes: u64,
}

impl Default for ProactiveAutoTriggerConfig {
    fn default() -> Self {
        Self { enabled: false, after_minutes: default_after_minutes() }
    }
}

/// Per-session overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProactiveSessionConfig {
    pub session_id: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_prompt")]
    pub prompt: String,
    #[serde(default)]
    pub provider_id: String,
    #[serde(default)]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default)]
    pub schedule: ProactiveScheduleConfig,
    #[serde(default)]
    pub auto_trigger: ProactiveAutoTriggerConfig,
}

/// Top-level proactive chat configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProactiveChatConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub state_path: String,
    /// IANA timezone name; empty means local time.
    #[serde(default)]
    pub timezone: String,
    #[serde(default)]
    pub apply_to_all_sessions: bool,
    #[serde(default)]
    pub session_allowlist: Vec<String>,
    #[serde(default = "default_prompt")]
    pub prompt: String,
    #[serde(default)]
    pub provider_id: String,
    #[serde(default)]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default)]
    pub schedule: ProactiveScheduleConfig,
    #[serde(default)]
    pub auto_trigger: ProactiveAutoTriggerConfig,
    #[serde(default)]
    pub sessions: Vec<ProactiveSessionConfig>,
}

impl Default for ProactiveChatConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            state_path: String::new(),
            timezone: String::new(),
            apply_to_all_sessions: false,
            session_allowlist: Vec::new(),
            prompt: default_prompt(),
            provider_id: String::new(),
            model: String::new(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            schedule: ProactiveScheduleConfig::default(),
            auto_trigger: ProactiveAutoTriggerConfig::default(),
            sessions: Vec::new(),
        }
    }
}

impl ProactiveChatConfig {
    /// Resolve the effective per-session config, or `None` when proactive
    /// chat does not apply to this session.
    pub fn session_config(&self, session_id: &str) -> Option<ProactiveSessionConfig> {
        if let Some(session) = self.sessions.iter().find(|s| s.session_id == session_id) {
            return session.enabled.then(|| session.clone());
        }
        if !self.apply_to_all_sessions && !self.session_allowlist.iter().any(|s| s == session_id) {
            return None;
        }
        Some(ProactiveSessionConfig {
            session_id: session_id.to_string(),
            enabled: true,
            prompt: self.prompt.clone(),
            provider_id: self.provider_id.clone(),
            model: self.model.clone(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            schedule: self.schedule.clone(),
            auto_trigger: self.auto_trigger.clone(),
        })
    }

    /// Session ids that should be considered for auto-triggering.
    pub fn enabled_session_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .sessions
            .iter()
            .filter(|s| s.enabled)
            .map(|s| s.session_id.clone())
            .collect();
        for id in &self.session_allowlist {
            if !ids.contains(id) {
                ids.push(id.clone());
            }
        }
        ids
    }
}

fn default_min_interval() -> u64 {
    30
}
fn default_max_interval() -> u64 {
    900
}
fn default_quiet_hours() -> String {
    "1-7".into()
}
fn default_max_unanswered() -> u32 {
    4
}
fn default_after_minutes() -> u64 {
    5
}
fn default_prompt() -> String {
    DEFAULT_PROACTIVE_PROMPT.into()
}
fn default_temperature() -> f64 {
    0.7
}
fn default_max_tokens() -> u32 {
    512
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_config_respects_allowlist() {
        let config = ProactiveChatConfig {
            enabled: true,
            session_allowlist: vec!["s1".into()],
            ..Default::default()
        };
        assert!(config.session_config("s1").is_some());
        assert!(config.session_config("s2").is_none());
    }

    #[test]
    fn apply_to_all_overrides_allowlist() {
        let config = ProactiveChatConfig {
            enabled: true,
            apply_to_all_sessions: true,
            ..Default::default()
        };
        let session = config.session_config("anything").unwrap();
        assert_eq!(session.session_id, "anything");
        assert_eq!(session.schedule.quiet_hours, "1-7");
    }

    #[test]
    fn disabled_session_entry_wins() {
        let config = ProactiveChatConfig {
            enabled: true,
            apply_to_all_sessions: true,
            sessions: vec![ProactiveSessionConfig {
                session_id: "muted".into(),
                enabled: false,
                prompt: default_prompt(),
                provider_id: String::new(),
                model: String::new(),
                temperature: 0.7,
                max_tokens: 512,
                schedule: ProactiveScheduleConfig::default(),
                auto_trigger: ProactiveAutoTriggerConfig::default(),
            }],
            ..Default::default()
        };
        assert!(config.session_config("muted").is_none());
    }
}
