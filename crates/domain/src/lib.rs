//! Shared domain types for the Cerise runtime.
//!
//! Everything other crates agree on lives here: the error taxonomy, chat and
//! tool message types, the `Ability` trait and its result types, capability
//! policy inputs, and the configuration schemas.

pub mod ability;
pub mod capability;
pub mod config;
pub mod error;
pub mod tool;

pub use ability::{Ability, AbilityCategory, AbilityContext, AbilityResult, AbilityType};
pub use capability::{
    CapabilitiesConfig, CapabilityDecision, CapabilityToggle, StarAbilityToggle, StarEntry,
    StarRegistry,
};
pub use error::{Error, Result};
pub use tool::{Message, MessageContent, Role, ToolCall, ToolDefinition};
