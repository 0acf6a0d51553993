//! Capability policy types.
//!
//! The effective policy for an ability is resolved by AND-folding the global
//! defaults, a per-ability override, and the owning plugin's "star" entry
//! (plus its per-ability toggles).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Resolved capability decision for a single ability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapabilityDecision {
    pub enabled: bool,
    pub allow_tools: bool,
    pub priority: i32,
}

/// Per-ability override in the global capabilities config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilityToggle {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_true")]
    pub allow_tools: bool,
    #[serde(default)]
    pub priority: i32,
}

impl Default for CapabilityToggle {
    fn default() -> Self {
        Self {
            enabled: true,
            allow_tools: true,
            priority: 0,
        }
    }
}

/// Global capability policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilitiesConfig {
    #[serde(default = "default_true")]
    pub default_enabled: bool,
    #[serde(default = "default_true")]
    pub allow_tools_by_default: bool,
    /// Per-ability overrides keyed by ability name.
    #[serde(default)]
    pub capabilities: HashMap<String, CapabilityToggle>,
}

impl Default for CapabilitiesConfig {
    fn default() -> Self {
        Self {
            default_enabled: true,
            allow_tools_by_default: true,
            capabilities: HashMap::new(),
        }
    }
}

/// Per-ability toggle under a star entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StarAbilityToggle {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_true")]
    pub allow_tools: bool,
}

/// Policy entry for one plugin: a coarse on/off plus per-ability toggles.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StarEntry {
    pub name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_true")]
    pub allow_tools: bool,
    #[serde(default)]
    pub abilities: HashMap<String, StarAbilityToggle>,
}

impl StarEntry {
    pub fn get_ability(&self, ability_name: &str) -> Option<&StarAbilityToggle> {
        self.abilities.get(ability_name)
    }
}

/// Collection of star entries keyed by plugin name.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StarRegistry {
    #[serde(default)]
    pub stars: Vec<StarEntry>,
}

impl StarRegistry {
    pub fn get_star(&self, plugin_name: &str) -> Option<&StarEntry> {
        self.stars.iter().find(|entry| entry.name == plugin_name)
    }
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toggle_defaults_are_permissive() {
        let toggle: CapabilityToggle = serde_json::from_str("{}").unwrap();
        assert!(toggle.enabled);
        assert!(toggle.allow_tools);
        assert_eq!(toggle.priority, 0);
    }

    #[test]
    fn star_lookup_by_name() {
        let registry = StarRegistry {
            stars: vec![StarEntry {
                name: "plugin-a".into(),
                enabled: false,
                allow_tools: true,
                abilities: HashMap::new(),
            }],
        };
        assert!(!registry.get_star("plugin-a").unwrap().enabled);
        assert!(registry.get_star("plugin-b").is_none());
    }
}
