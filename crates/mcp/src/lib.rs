//! MCP (Model Context Protocol) over stdio: LSP-style framing, JSON-RPC
//! client for external servers, the manager that wraps remote tools as
//! abilities, and the server that exposes local abilities as MCP tools.

pub mod client;
pub mod framing;
pub mod manager;
pub mod mcp_client;
pub mod naming;
pub mod protocol;
pub mod server;

pub use client::JsonRpcStdioClient;
pub use manager::{McpManager, McpToolAbility};
pub use mcp_client::McpStdioClient;
pub use server::{AbilityToolSource, McpStdioAbilityServer};
