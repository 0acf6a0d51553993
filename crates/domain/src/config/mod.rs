//! Configuration schemas shared across the runtime.
//!
//! These are plain serde structs; file loading and environment expansion live
//! in the runtime crate.

mod app;
mod mcp;
mod memory;
mod plugins;
mod proactive;
mod providers;

pub use app::*;
pub use mcp::*;
pub use memory::*;
pub use plugins::*;
pub use proactive::*;
pub use providers::*;

pub(crate) fn default_true() -> bool {
    true
}
