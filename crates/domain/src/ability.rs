//! Ability trait and execution types.
//!
//! An ability is a named, parameter-validated, permission-gated unit of
//! functionality exposable as an LLM tool. Built-ins implement the trait
//! directly; plugin and MCP tools are wrapped in proxy implementations.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Where an ability comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AbilityType {
    Builtin,
    Plugin,
}

/// Coarse grouping used by dashboards and policy defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AbilityCategory {
    System,
    Media,
    Network,
    Creative,
    Utility,
    Game,
}

/// Result of an ability execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AbilityResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Hint for character emotion reaction.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub emotion_hint: Option<String>,
}

impl AbilityResult {
    pub fn ok(data: impl Into<Value>) -> Self {
        Self {
            success: true,
            data: Some(data.into()),
            error: None,
            emotion_hint: None,
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
            emotion_hint: None,
        }
    }
}

/// Context passed into every ability execution.
#[derive(Debug, Clone, Default)]
pub struct AbilityContext {
    pub user_id: String,
    pub session_id: String,
    pub character_state: serde_json::Map<String, Value>,
    pub permissions: Vec<String>,
}

impl AbilityContext {
    pub fn new(user_id: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            session_id: session_id.into(),
            ..Default::default()
        }
    }

    pub fn with_permissions(mut self, permissions: Vec<String>) -> Self {
        self.permissions = permissions;
        self
    }
}

/// Trait implemented by every ability.
#[async_trait]
pub trait Ability: Send + Sync {
    /// Unique identifier (doubles as the LLM tool name).
    fn name(&self) -> &str;

    /// Human-readable display name.
    fn display_name(&self) -> &str;

    /// Description for LLM understanding.
    fn description(&self) -> String;

    fn ability_type(&self) -> AbilityType;

    fn category(&self) -> AbilityCategory;

    /// JSON Schema for the parameters.
    fn parameters_schema(&self) -> Value;

    /// Permissions the caller's context must carry.
    fn required_permissions(&self) -> Vec<String> {
        Vec::new()
    }

    /// Pre-execution parameter validation hook.
    async fn validate_params(&self, _params: &Value) -> bool {
        true
    }

    async fn execute(&self, params: Value, context: &AbilityContext) -> AbilityResult;

    async fn on_load(&self) {}

    async fn on_unload(&self) {}

    /// OpenAI-compatible function tool schema.
    fn to_tool_schema(&self) -> Value {
        serde_json::json!({
            "type": "function",
            "function": {
                "name": self.name(),
                "description": self.description(),
                "parameters": self.parameters_schema(),
            },
        })
    }
}

/// Pull the function name out of a tool schema produced by [`Ability::to_tool_schema`].
pub fn tool_schema_name(schema: &Value) -> Option<&str> {
    schema.get("function")?.get("name")?.as_str()
}
