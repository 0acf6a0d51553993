//! Minimal MCP client for stdio servers.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::Mutex;

use cerise_domain::config::McpServerConfig;
use cerise_domain::error::Result;

use crate::client::JsonRpcStdioClient;
use crate::protocol::{self, ToolsListResult};

/// MCP client bound to one configured server. The subprocess is spawned
/// lazily on first use and kept alive until `close`.
pub struct McpStdioClient {
    config: McpServerConfig,
    rpc: Mutex<Option<Arc<JsonRpcStdioClient>>>,
}

impl McpStdioClient {
    pub fn new(config: McpServerConfig) -> Self {
        Self {
            config,
            rpc: Mutex::new(None),
        }
    }

    pub fn server_id(&self) -> &str {
        &self.config.id
    }

    /// Spawn the subprocess and perform the MCP handshake. Idempotent.
    pub async fn start(&self) -> Result<()> {
        let mut guard = self.rpc.lock().await;
        if guard.is_some() {
            return Ok(());
        }
        let client = JsonRpcStdioClient::spawn(
            &format!("mcp:{}", self.config.id),
            &self.config.command,
            &self.config.args,
            &self.config.env,
        )?;

        client
            .request(
                "initialize",
                Some(protocol::initialize_params("cerise", env!("CARGO_PKG_VERSION"))),
            )
            .await?;
        if let Err(e) = client.notify("initialized", None).await {
            tracing::debug!(server_id = %self.config.id, error = %e, "initialized notification failed");
        }
        tracing::info!(server_id = %self.config.id, "MCP server initialized");
        *guard = Some(Arc::new(client));
        Ok(())
    }

    pub async fn close(&self) {
        let client = self.rpc.lock().await.take();
        if let Some(client) = client {
            client.close().await;
        }
    }

    /// Discover the server's tools. Tolerates partially malformed entries.
    pub async fn list_tools(&self) -> Result<Vec<protocol::McpTool>> {
        let result = self.request("tools/list", Some(serde_json::json!({}))).await?;
        let parsed: ToolsListResult = serde_json::from_value(result).unwrap_or_else(|e| {
            tracing::warn!(server_id = %self.config.id, error = %e, "failed to parse tools/list result");
            ToolsListResult { tools: Vec::new() }
        });
        Ok(parsed
            .tools
            .into_iter()
            .filter(|tool| !tool.name.trim().is_empty())
            .collect())
    }

    /// Invoke a tool and return the raw result value.
    pub async fn call_tool(&self, tool_name: &str, arguments: Value) -> Result<Value> {
        self.request(
            "tools/call",
            Some(serde_json::json!({ "name": tool_name, "arguments": arguments })),
        )
        .await
    }

    async fn request(&self, method: &str, params: Option<Value>) -> Result<Value> {
        self.start().await?;
        let client = self.rpc.lock().await.as_ref().map(Arc::clone);
        match client {
            Some(client) => client.request(method, params).await,
            None => Err(cerise_domain::error::Error::Cancelled(
                "MCP client not started".into(),
            )),
        }
    }
}
