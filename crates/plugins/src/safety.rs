//! Plugin name validation.
//!
//! Plugin names derive filesystem paths, so names that could escape the
//! plugins directory are rejected before any path is built.

use cerise_domain::error::{Error, Result};

/// Validate a user-supplied plugin name. Rejects empty names, `.`/`..`, and
/// names containing `/`, `\`, or `:`.
pub fn validate_plugin_name(name: &str) -> Result<String> {
    let cleaned = name.trim();
    if cleaned.is_empty() {
        return Err(Error::InvalidArgument("Plugin name is required".into()));
    }
    if cleaned == "." || cleaned == ".." {
        return Err(Error::InvalidArgument("Invalid plugin name".into()));
    }
    if cleaned.contains(['/', '\\', ':']) {
        return Err(Error::InvalidArgument("Invalid plugin name".into()));
    }
    Ok(cleaned.to_string())
}
