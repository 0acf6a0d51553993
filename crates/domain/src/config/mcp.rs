//! MCP (Model Context Protocol) configuration types.
//!
//! Lightweight config structs for the `mcp` section of the runtime config.
//! The actual client logic lives in the `cerise-mcp` crate.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::default_true;

/// Top-level MCP configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct McpConfig {
    /// External MCP servers whose tools are wrapped as abilities.
    #[serde(default)]
    pub servers: Vec<McpServerConfig>,
}

/// Connection parameters for a stdio MCP server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpServerConfig {
    /// Unique identifier, used in ability naming (`mcp_<id>__<tool>`).
    pub id: String,

    /// The command to spawn (e.g. `"npx"`).
    pub command: String,

    #[serde(default)]
    pub args: Vec<String>,

    /// Extra environment variables for the spawned process.
    #[serde(default)]
    pub env: HashMap<String, String>,

    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Overrides the default `mcp_<id>__` ability-name prefix.
    #[serde(default)]
    pub tool_name_prefix: Option<String>,
}

impl McpServerConfig {
    pub fn new(id: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            command: command.into(),
            args: Vec::new(),
            env: HashMap::new(),
            enabled: true,
            tool_name_prefix: None,
        }
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }
}
