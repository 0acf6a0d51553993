//! Skill library with token/embedding search and the tool-run audit log.

pub mod models;
pub mod service;
pub mod store;

pub use models::{Skill, ToolRun};
pub use service::SkillService;
