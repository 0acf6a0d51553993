//! Multi-agent inboxes and wakeups backed by the state store.

pub mod models;
pub mod service;
pub mod store;

pub use models::{Agent, AgentMessage};
pub use service::AgentService;
