//! Ability-name sanitization for external MCP tools.

use sha1::{Digest, Sha1};

/// Maximum length for the wrapped ability name.
pub const MAX_TOOL_NAME_LEN: usize = 64;

/// Collapse characters outside `[A-Za-z0-9_-]` to `_` and trim surrounding
/// underscores. An empty result becomes `"tool"`.
pub fn sanitize_tool_component(value: &str) -> String {
    let cleaned = collapse_invalid(value);
    let cleaned = cleaned.trim_matches('_').to_string();
    if cleaned.is_empty() {
        "tool".into()
    } else {
        cleaned
    }
}

fn collapse_invalid(value: &str) -> String {
    let mut cleaned = String::with_capacity(value.len());
    let mut last_was_replacement = false;
    for ch in value.trim().chars() {
        if ch.is_ascii_alphanumeric() || ch == '_' || ch == '-' {
            cleaned.push(ch);
            last_was_replacement = false;
        } else if !last_was_replacement {
            cleaned.push('_');
            last_was_replacement = true;
        }
    }
    cleaned
}

/// Truncate a name to [`MAX_TOOL_NAME_LEN`] by replacing the tail with
/// `_<sha1[:8]>` of the full name. Names already within the limit pass
/// through unchanged.
pub fn limit_tool_name(name: &str) -> String {
    if name.len() <= MAX_TOOL_NAME_LEN {
        return name.to_string();
    }
    let digest = hex::encode(Sha1::digest(name.as_bytes()));
    let digest = &digest[..8];
    let keep = MAX_TOOL_NAME_LEN - (digest.len() + 1);
    format!("{}_{digest}", &name[..keep])
}

/// Build the ability name for a remote tool: `<prefix><sanitized_tool>`,
/// length-limited. The default prefix is `mcp_<server_id>__`.
pub fn build_ability_name(server_id: &str, tool_name: &str, prefix: Option<&str>) -> String {
    let mut safe_prefix = match prefix {
        Some(p) => collapse_invalid(p),
        None => format!("mcp_{}__", sanitize_tool_component(server_id)),
    };
    if !safe_prefix.ends_with('_') {
        safe_prefix.push('_');
    }
    let safe_tool = sanitize_tool_component(tool_name);
    limit_tool_name(&format!("{safe_prefix}{safe_tool}"))
}
