//! Dialogue engine, sessions, and the proactive chat scheduler.

pub mod engine;
pub mod proactive;
pub mod proactive_time;
pub mod session;

pub use engine::{ChatOverrides, DialogueEngine};
pub use proactive::{ProactiveChatService, ProactiveSessionState};
pub use session::{Session, SessionManager};
