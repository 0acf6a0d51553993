//! Minimal MCP stdio server with a single `echo` ability.
//!
//! Used by integration tests and as a wiring smoke check:
//! `cerise-echo-mcp` speaks Content-Length-framed JSON-RPC on stdio.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use cerise_abilities::AbilityRegistry;
use cerise_domain::ability::{
    Ability, AbilityCategory, AbilityContext, AbilityResult, AbilityType,
};
use cerise_mcp::McpStdioAbilityServer;

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
        serde_json::json!({
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

fn main() -> std::process::ExitCode {
    let registry = AbilityRegistry::new();
    registry.register(Arc::new(EchoAbility));
    let server = McpStdioAbilityServer::new(registry);
    match server.serve_blocking(std::io::stdin().lock(), std::io::stdout().lock()) {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("echo-mcp server failed: {e}");
            std::process::ExitCode::FAILURE
        }
    }
}
