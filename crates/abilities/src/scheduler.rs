//! Capability scheduler.
//!
//! Resolves the effective `(enabled, allow_tools, priority)` for each ability
//! by AND-folding the global capability config with the owning plugin's star
//! entry, filters the tool schemas handed to the LLM, and gates execution.

use std::sync::Arc;

use serde_json::Value;

use cerise_domain::ability::{tool_schema_name, AbilityContext, AbilityResult};
use cerise_domain::capability::{CapabilitiesConfig, CapabilityDecision, StarRegistry};

use crate::registry::AbilityRegistry;

/// Configuration-driven ability scheduler.
pub struct CapabilityScheduler {
    registry: Arc<AbilityRegistry>,
    config: CapabilitiesConfig,
    star_registry: Option<StarRegistry>,
}

impl CapabilityScheduler {
    pub fn new(
        registry: Arc<AbilityRegistry>,
        config: CapabilitiesConfig,
        star_registry: Option<StarRegistry>,
    ) -> Self {
        Self {
            registry,
            config,
            star_registry,
        }
    }

    /// Resolved capability decision for an ability.
    pub fn decision_for(&self, ability_name: &str) -> CapabilityDecision {
        let base = match self.config.capabilities.get(ability_name) {
            Some(toggle) => CapabilityDecision {
                enabled: toggle.enabled,
                allow_tools: toggle.allow_tools,
                priority: toggle.priority,
            },
            None => CapabilityDecision {
                enabled: self.config.default_enabled,
                allow_tools: self.config.allow_tools_by_default,
                priority: 0,
            },
        };

        let Some(star) = self.resolve_star(ability_name) else {
            return base;
        };

        CapabilityDecision {
            enabled: base.enabled && star.enabled,
            allow_tools: base.allow_tools && star.allow_tools,
            priority: base.priority,
        }
    }

    fn resolve_star(&self, ability_name: &str) -> Option<CapabilityDecision> {
        let star_registry = self.star_registry.as_ref()?;
        let owner = self.registry.get_ability_owner(ability_name)?;
        let entry = star_registry.get_star(&owner)?;
        let mut enabled = entry.enabled;
        let mut allow_tools = entry.allow_tools;
        if let Some(toggle) = entry.get_ability(ability_name) {
            enabled = enabled && toggle.enabled;
            allow_tools = allow_tools && toggle.allow_tools;
        }
        Some(CapabilityDecision {
            enabled,
            allow_tools,
            priority: 0,
        })
    }

    /// Tool schemas filtered by `enabled && allow_tools`, sorted by priority
    /// descending. The sort is stable, so equal priorities keep registration
    /// order.
    pub fn get_tool_schemas(&self) -> Vec<Value> {
        let mut filtered: Vec<(i32, Value)> = Vec::new();
        for schema in self.registry.get_tool_schemas() {
            let Some(name) = tool_schema_name(&schema) else {
                continue;
            };
            let decision = self.decision_for(name);
            if decision.enabled && decision.allow_tools {
                filtered.push((decision.priority, schema));
            }
        }
        filtered.sort_by_key(|(priority, _)| std::cmp::Reverse(*priority));
        filtered.into_iter().map(|(_, schema)| schema).collect()
    }

    /// Execute an ability if the resolved policy allows it.
    pub async fn execute(
        &self,
        ability_name: &str,
        params: Value,
        context: &AbilityContext,
    ) -> AbilityResult {
        let decision = self.decision_for(ability_name);
        if !decision.enabled {
            tracing::info!(ability = %ability_name, "ability disabled by capability config");
            return AbilityResult::err(format!("Ability '{ability_name}' disabled"));
        }
        if !decision.allow_tools {
            tracing::info!(ability = %ability_name, "ability tool execution disabled by capability config");
            return AbilityResult::err(format!(
                "Ability '{ability_name}' tool execution disabled"
            ));
        }
        self.registry.execute(ability_name, params, context).await
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use async_trait::async_trait;
    use cerise_domain::ability::{Ability, AbilityCategory, AbilityType};
    use cerise_domain::capability::{CapabilityToggle, StarAbilityToggle, StarEntry};

    use super::*;

    struct Named(&'static str);

    #[async_trait]
    impl Ability for Named {
        fn name(&self) -> &str {
            self.0
        }
        fn display_name(&self) -> &str {
            self.0
        }
        fn description(&self) -> String {
            String::new()
        }
        fn ability_type(&self) -> AbilityType {
            AbilityType::Builtin
        }
        fn category(&self) -> AbilityCategory {
            AbilityCategory::Utility
        }
        fn parameters_schema(&self) -> Value {
            serde_json::json!({ "type": "object", "properties": {} })
        }
        async fn execute(&self, _params: Value, _context: &AbilityContext) -> AbilityResult {
            AbilityResult::ok(self.0)
        }
    }

    fn registry_with(abilities: &[&'static str]) -> Arc<AbilityRegistry> {
        let registry = Arc::new(AbilityRegistry::new());
        for name in abilities {
            registry.register(Arc::new(Named(name)));
        }
        registry
    }

    fn names(schemas: &[Value]) -> Vec<&str> {
        schemas.iter().filter_map(tool_schema_name).collect()
    }

    #[tokio::test]
    async fn disabled_override_filters_and_blocks() {
        let registry = registry_with(&["alpha", "beta"]);
        let config = CapabilitiesConfig {
            default_enabled: true,
            allow_tools_by_default: true,
            capabilities: HashMap::from([(
                "alpha".to_string(),
                CapabilityToggle { enabled: false, allow_tools: true, priority: 0 },
            )]),
        };
        let scheduler = CapabilityScheduler::new(registry, config, None);

        assert_eq!(names(&scheduler.get_tool_schemas()), vec!["beta"]);

        let result = scheduler
            .execute("alpha", Value::Null, &AbilityContext::new("u1", "s1"))
            .await;
        assert!(!result.success);
        assert_eq!(result.error.unwrap(), "Ability 'alpha' disabled");
    }

    #[tokio::test]
    async fn allow_tools_off_gives_distinct_error() {
        let registry = registry_with(&["alpha"]);
        let config = CapabilitiesConfig {
            capabilities: HashMap::from([(
                "alpha".to_string(),
                CapabilityToggle { enabled: true, allow_tools: false, priority: 0 },
            )]),
            ..Default::default()
        };
        let scheduler = CapabilityScheduler::new(registry, config, None);
        assert!(scheduler.get_tool_schemas().is_empty());
        let result = scheduler
            .execute("alpha", Value::Null, &AbilityContext::new("u1", "s1"))
            .await;
        assert_eq!(
            result.error.unwrap(),
            "Ability 'alpha' tool execution disabled"
        );
    }

    #[tokio::test]
    async fn star_toggles_and_fold_onto_base() {
        let registry = Arc::new(AbilityRegistry::new());
        registry.register(Arc::new(Named("alpha")));
        registry.register_owned(Arc::new(Named("beta")), "plugin-a");

        let stars = StarRegistry {
            stars: vec![StarEntry {
                name: "plugin-a".into(),
                enabled: true,
                allow_tools: true,
                abilities: HashMap::from([(
                    "beta".to_string(),
                    StarAbilityToggle { enabled: false, allow_tools: false },
                )]),
            }],
        };
        let scheduler =
            CapabilityScheduler::new(registry, CapabilitiesConfig::default(), Some(stars));

        assert_eq!(names(&scheduler.get_tool_schemas()), vec!["alpha"]);
        let result = scheduler
            .execute("beta", Value::Null, &AbilityContext::new("u1", "s1"))
            .await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("disabled"));
    }

    #[tokio::test]
    async fn schemas_sorted_by_priority_descending() {
        let registry = registry_with(&["low", "high", "mid"]);
        let config = CapabilitiesConfig {
            capabilities: HashMap::from([
                ("high".to_string(), CapabilityToggle { enabled: true, allow_tools: true, priority: 10 }),
                ("mid".to_string(), CapabilityToggle { enabled: true, allow_tools: true, priority: 5 }),
            ]),
            ..Default::default()
        };
        let scheduler = CapabilityScheduler::new(registry, config, None);
        assert_eq!(names(&scheduler.get_tool_schemas()), vec!["high", "mid", "low"]);
    }
}
