//! Top-level runtime configuration (`config.yaml`) and environment knobs.

use serde::{Deserialize, Serialize};

use crate::capability::{CapabilitiesConfig, StarRegistry};

use super::{McpConfig, MemoryConfig, PluginsConfig, ProactiveChatConfig};

/// Environment variable names recognized by the runtime.
pub mod env_vars {
    pub const DATA_DIR: &str = "CERISE_DATA_DIR";
    pub const SERVER_HOST: &str = "CERISE_SERVER_HOST";
    pub const SERVER_PORT: &str = "CERISE_SERVER_PORT";
    pub const SERVER_DEBUG: &str = "CERISE_SERVER_DEBUG";
    pub const LOG_LEVEL: &str = "CERISE_LOG_LEVEL";
    pub const ADMIN_TOKEN: &str = "CERISE_ADMIN_TOKEN";
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub debug: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { host: default_host(), port: default_port(), debug: false }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DialogueConfig {
    #[serde(default)]
    pub provider_id: String,
    #[serde(default)]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_dialogue_max_tokens")]
    pub max_tokens: u32,
    /// Character persona text prepended as the first system message.
    #[serde(default)]
    pub persona: String,
    #[serde(default = "super::default_true")]
    pub use_tools: bool,
    #[serde(default = "default_skill_top_k")]
    pub skill_top_k: usize,
    #[serde(default = "default_recall_limit")]
    pub memory_recall_limit: usize,
}

impl Default for DialogueConfig {
    fn default() -> Self {
        Self {
            provider_id: String::new(),
            model: String::new(),
            temperature: default_temperature(),
            max_tokens: default_dialogue_max_tokens(),
            persona: String::new(),
            use_tools: true,
            skill_top_k: default_skill_top_k(),
            memory_recall_limit: default_recall_limit(),
        }
    }
}

/// Top-level application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub dialogue: DialogueConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub capabilities: CapabilitiesConfig,
    #[serde(default)]
    pub stars: StarRegistry,
    #[serde(default)]
    pub plugins: PluginsConfig,
    #[serde(default)]
    pub mcp: McpConfig,
    #[serde(default)]
    pub proactive: ProactiveChatConfig,
}

fn default_host() -> String {
    "127.0.0.1".into()
}
fn default_port() -> u16 {
    8765
}
fn default_temperature() -> f64 {
    0.7
}
fn default_dialogue_max_tokens() -> u32 {
    2048
}
fn default_skill_top_k() -> usize {
    3
}
fn default_recall_limit() -> usize {
    5
}
