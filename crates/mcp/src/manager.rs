//! MCP manager — owns the configured server clients and registers each
//! remote tool as a Cerise ability.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use cerise_abilities::AbilityRegistry;
use cerise_domain::ability::{
    Ability, AbilityCategory, AbilityContext, AbilityResult, AbilityType,
};
use cerise_domain::config::McpConfig;

use crate::mcp_client::McpStdioClient;
use crate::naming::build_ability_name;
use crate::protocol::{call_result_is_error, call_result_to_text, McpTool};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// McpToolAbility
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Synthetic ability wrapping one remote MCP tool.
pub struct McpToolAbility {
    ability_name: String,
    display_name: String,
    tool: McpTool,
    client: Arc<McpStdioClient>,
}

impl McpToolAbility {
    /// Wrap a tool under a caller-chosen ability name. Used by the plugin
    /// manager, which registers plugin tools under their own names.
    pub fn for_plugin(
        ability_name: String,
        display_name: String,
        tool: McpTool,
        client: Arc<McpStdioClient>,
    ) -> Self {
        Self {
            ability_name,
            display_name,
            tool,
            client,
        }
    }
}

#[async_trait]
impl Ability for McpToolAbility {
    fn name(&self) -> &str {
        &self.ability_name
    }

    fn display_name(&self) -> &str {
        &self.display_name
    }

    fn description(&self) -> String {
        match &self.tool.description {
            Some(description) if !description.is_empty() => {
                format!("[MCP:{}] {description}", self.client.server_id())
            }
            _ => format!("[MCP:{}] {}", self.client.server_id(), self.tool.name),
        }
    }

    fn ability_type(&self) -> AbilityType {
        AbilityType::Plugin
    }

    fn category(&self) -> AbilityCategory {
        AbilityCategory::Utility
    }

    fn parameters_schema(&self) -> Value {
        self.tool.schema_or_default()
    }

    async fn execute(&self, params: Value, _context: &AbilityContext) -> AbilityResult {
        let raw = match self.client.call_tool(&self.tool.name, params).await {
            Ok(raw) => raw,
            Err(e) => return AbilityResult::err(e.to_string()),
        };
        if call_result_is_error(&raw) {
            return AbilityResult {
                success: false,
                data: Some(raw.clone()),
                error: Some(call_result_to_text(&raw)),
                emotion_hint: None,
            };
        }
        AbilityResult::ok(call_result_to_text(&raw))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// McpManager
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Loads MCP servers and registers their tools as abilities.
///
/// Registered abilities are owned by `mcp:<server_id>` in the registry, so
/// star policy entries can target a whole server.
#[derive(Default)]
pub struct McpManager {
    clients: HashMap<String, Arc<McpStdioClient>>,
    registered: Vec<String>,
}

impl McpManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ability names registered by this manager.
    pub fn registered_abilities(&self) -> &[String] {
        &self.registered
    }

    /// Connect each enabled server, list its tools, and register them.
    /// A server that fails to initialize is logged and skipped.
    pub async fn load_and_register(&mut self, config: &McpConfig, registry: &AbilityRegistry) {
        for server in &config.servers {
            if !server.enabled {
                continue;
            }
            let client = Arc::new(McpStdioClient::new(server.clone()));
            let tools = match client.list_tools().await {
                Ok(tools) => tools,
                Err(e) => {
                    tracing::warn!(
                        server_id = %server.id,
                        error = %e,
                        "failed to initialize MCP server, skipping"
                    );
                    client.close().await;
                    continue;
                }
            };

            let owner = format!("mcp:{}", server.id);
            for tool in tools {
                let ability_name =
                    build_ability_name(&server.id, &tool.name, server.tool_name_prefix.as_deref());
                let display_name = format!("{} (MCP:{})", tool.name, server.id);
                registry.register_owned(
                    Arc::new(McpToolAbility {
                        ability_name: ability_name.clone(),
                        display_name,
                        tool,
                        client: Arc::clone(&client),
                    }),
                    &owner,
                );
                self.registered.push(ability_name);
            }
            self.clients.insert(server.id.clone(), client);
        }

        if !self.clients.is_empty() {
            tracing::info!(
                servers = self.clients.len(),
                tools = self.registered.len(),
                "MCP manager ready"
            );
        }
    }

    pub fn server_count(&self) -> usize {
        self.clients.len()
    }

    /// Close every client, rejecting their in-flight requests.
    pub async fn close(&mut self) {
        for (server_id, client) in self.clients.drain() {
            tracing::info!(server_id = %server_id, "shutting down MCP server");
            client.close().await;
        }
    }
}
