//! Runtime wiring for the `cerise` binary: configuration loading, the
//! admin guard, builtin abilities, and the service graph.

pub mod admin;
pub mod builtin;
pub mod config;
pub mod runtime;

pub use admin::AdminGuard;
pub use runtime::Runtime;
