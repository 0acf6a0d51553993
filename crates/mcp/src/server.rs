//! MCP server exposing local abilities as tools over stdio.
//!
//! Implements the subset of MCP the bridge needs: `initialize`,
//! `tools/list`, `tools/call`, and `ping`. Unknown methods answer with
//! JSON-RPC `-32601`; notifications are ignored. The serve loop is
//! synchronous over the given streams and drives ability execution on a
//! current-thread runtime, so it can run as a standalone process entry.

use std::io::{BufReader, Read, Write};

use async_trait::async_trait;
use serde_json::{json, Value};

use cerise_abilities::{AbilityRegistry, CapabilityScheduler};
use cerise_domain::ability::{AbilityContext, AbilityResult};
use cerise_domain::error::Result;

use crate::framing;
use crate::protocol::MCP_PROTOCOL_VERSION;

/// Source of tool schemas and execution the server fronts for. Implemented
/// by both the raw registry and the capability scheduler.
#[async_trait]
pub trait AbilityToolSource: Send + Sync {
    fn tool_schemas(&self) -> Vec<Value>;

    async fn execute_tool(
        &self,
        name: &str,
        params: Value,
        context: &AbilityContext,
    ) -> AbilityResult;
}

#[async_trait]
impl AbilityToolSource for AbilityRegistry {
    fn tool_schemas(&self) -> Vec<Value> {
        self.get_tool_schemas()
    }

    async fn execute_tool(
        &self,
        name: &str,
        params: Value,
        context: &AbilityContext,
    ) -> AbilityResult {
        self.execute(name, params, context).await
    }
}

#[async_trait]
impl AbilityToolSource for CapabilityScheduler {
    fn tool_schemas(&self) -> Vec<Value> {
        self.get_tool_schemas()
    }

    async fn execute_tool(
        &self,
        name: &str,
        params: Value,
        context: &AbilityContext,
    ) -> AbilityResult {
        self.execute(name, params, context).await
    }
}

/// Expose abilities as MCP tools over stdio.
pub struct McpStdioAbilityServer<S> {
    source: S,
    allowed_permissions: Vec<String>,
    default_user_id: String,
    default_session_id: String,
}

impl<S: AbilityToolSource> McpStdioAbilityServer<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            allowed_permissions: Vec::new(),
            default_user_id: String::new(),
            default_session_id: String::new(),
        }
    }

    pub fn with_permissions(mut self, permissions: Vec<String>) -> Self {
        self.allowed_permissions = permissions;
        self
    }

    pub fn with_defaults(mut self, user_id: &str, session_id: &str) -> Self {
        self.default_user_id = user_id.to_string();
        self.default_session_id = session_id.to_string();
        self
    }

    /// Serve until EOF on `stdin`. Blocks the calling thread; ability
    /// futures run on an internal current-thread runtime.
    pub fn serve_blocking(&self, stdin: impl Read, mut stdout: impl Write) -> Result<()> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(cerise_domain::error::Error::Io)?;
        let mut reader = BufReader::new(stdin);
        loop {
            let message = match framing::read_message(&mut reader) {
                Ok(Some(message)) => message,
                Ok(None) => return Ok(()),
                Err(e) => return Err(e),
            };
            if let Some(response) = runtime.block_on(self.handle_message(message)) {
                framing::write_message(&mut stdout, &response)?;
            }
        }
    }

    /// Handle one decoded message, returning the response to write (none for
    /// notifications).
    pub async fn handle_message(&self, message: Value) -> Option<Value> {
        // Notifications carry no id and get no response.
        let id = message.get("id")?.as_u64()?;
        let method = message.get("method").and_then(Value::as_str).unwrap_or("");
        let params = message
            .get("params")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();

        let response = match method {
            "initialize" => json!({
                "jsonrpc": "2.0",
                "id": id,
                "result": {
                    "protocolVersion": MCP_PROTOCOL_VERSION,
                    "capabilities": { "tools": {} },
                    "serverInfo": { "name": "cerise", "version": env!("CARGO_PKG_VERSION") },
                },
            }),
            "tools/list" => json!({
                "jsonrpc": "2.0",
                "id": id,
                "result": { "tools": self.build_tools() },
            }),
            "tools/call" => {
                let name = params.get("name").and_then(Value::as_str).unwrap_or("");
                if name.is_empty() {
                    tool_error_response(id, "Missing tool name")
                } else {
                    let arguments = params
                        .get("arguments")
                        .filter(|v| v.is_object())
                        .cloned()
                        .unwrap_or_else(|| json!({}));
                    let context = AbilityContext {
                        user_id: self.default_user_id.clone(),
                        session_id: self.default_session_id.clone(),
                        character_state: Default::default(),
                        permissions: self.allowed_permissions.clone(),
                    };
                    let result = self.source.execute_tool(name, arguments, &context).await;
                    let (text, is_error) = ability_result_to_text(&result);
                    json!({
                        "jsonrpc": "2.0",
                        "id": id,
                        "result": {
                            "content": [{ "type": "text", "text": text }],
                            "isError": is_error,
                        },
                    })
                }
            }
            "ping" => json!({ "jsonrpc": "2.0", "id": id, "result": {} }),
            other => json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": { "code": -32601, "message": format!("Unknown method: {other}") },
            }),
        };
        Some(response)
    }

    fn build_tools(&self) -> Vec<Value> {
        self.source
            .tool_schemas()
            .iter()
            .filter_map(|schema| {
                let function = schema.get("function")?.as_object()?;
                let name = function.get("name")?.as_str()?;
                if name.is_empty() {
                    return None;
                }
                Some(json!({
                    "name": name,
                    "description": function.get("description").and_then(Value::as_str).unwrap_or(""),
                    "inputSchema": function
                        .get("parameters")
                        .cloned()
                        .unwrap_or_else(|| json!({ "type": "object", "properties": {} })),
                }))
            })
            .collect()
    }
}

fn tool_error_response(id: u64, message: &str) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": {
            "content": [{ "type": "text", "text": message }],
            "isError": true,
        },
    })
}

fn ability_result_to_text(result: &AbilityResult) -> (String, bool) {
    if result.success {
        let text = match &result.data {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(text)) => text.clone(),
            Some(other) => other.to_string(),
        };
        (text, false)
    } else {
        (
            result.error.clone().unwrap_or_else(|| "Error".into()),
            true,
        )
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use cerise_domain::ability::{Ability, AbilityCategory, AbilityType};

    use super::*;

    struct EchoAbility;

    #[async_trait]
    impl Ability for EchoAbility {
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
            json!({
                "type": "object",
                "properties": { "text": { "type": "string" } },
                "required": ["text"],
            })
        }
        async fn execute(&self, params: Value, _context: &AbilityContext) -> AbilityResult {
            let text = params.get("text").and_then(Value::as_str).unwrap_or("");
            AbilityResult::ok(format!("echo:{text}"))
        }
    }

    fn server() -> McpStdioAbilityServer<AbilityRegistry> {
        let registry = AbilityRegistry::new();
        registry.register(Arc::new(EchoAbility));
        McpStdioAbilityServer::new(registry)
    }

    #[tokio::test]
    async fn initialize_reports_protocol_version() {
        let response = server()
            .handle_message(json!({ "jsonrpc": "2.0", "id": 1, "method": "initialize" }))
            .await
            .unwrap();
        assert_eq!(response["result"]["protocolVersion"], MCP_PROTOCOL_VERSION);
        assert!(response["result"]["capabilities"]["tools"].is_object());
    }

    #[tokio::test]
    async fn tools_list_projects_registry_schemas() {
        let response = server()
            .handle_message(json!({ "jsonrpc": "2.0", "id": 2, "method": "tools/list" }))
            .await
            .unwrap();
        let tools = response["result"]["tools"].as_array().unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0]["name"], "echo");
        assert_eq!(tools[0]["description"], "Echo back input text.");
        assert_eq!(tools[0]["inputSchema"]["required"], json!(["text"]));
    }

    #[tokio::test]
    async fn tools_call_round_trip() {
        let response = server()
            .handle_message(json!({
                "jsonrpc": "2.0", "id": 3, "method": "tools/call",
                "params": { "name": "echo", "arguments": { "text": "hi" } },
            }))
            .await
            .unwrap();
        assert_eq!(response["result"]["content"][0]["text"], "echo:hi");
        assert_eq!(response["result"]["isError"], false);
    }

    #[tokio::test]
    async fn missing_tool_reports_is_error() {
        let response = server()
            .handle_message(json!({
                "jsonrpc": "2.0", "id": 4, "method": "tools/call",
                "params": { "name": "nope", "arguments": {} },
            }))
            .await
            .unwrap();
        assert_eq!(response["result"]["isError"], true);
        assert_eq!(
            response["result"]["content"][0]["text"],
            "Ability 'nope' not found"
        );
    }

    #[tokio::test]
    async fn unknown_method_is_32601() {
        let response = server()
            .handle_message(json!({ "jsonrpc": "2.0", "id": 5, "method": "resources/list" }))
            .await
            .unwrap();
        assert_eq!(response["error"]["code"], -32601);
    }

    #[tokio::test]
    async fn notifications_are_ignored() {
        let response = server()
            .handle_message(json!({ "jsonrpc": "2.0", "method": "initialized" }))
            .await;
        assert!(response.is_none());
    }

    #[tokio::test]
    async fn ping_returns_empty_result() {
        let response = server()
            .handle_message(json!({ "jsonrpc": "2.0", "id": 6, "method": "ping" }))
            .await
            .unwrap();
        assert_eq!(response["result"], json!({}));
    }
}
