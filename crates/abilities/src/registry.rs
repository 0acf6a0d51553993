//! Ability registry.
//!
//! Process-wide map of named abilities plus the `ability -> owner` mapping
//! used by the capability scheduler (star resolution) and the plugin manager
//! (auto-unregister on unload).

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;

use cerise_domain::ability::{Ability, AbilityContext, AbilityResult};

#[derive(Default)]
struct Inner {
    abilities: HashMap<String, Arc<dyn Ability>>,
    /// Registration order, kept so tool schema listings are deterministic.
    order: Vec<String>,
    owners: HashMap<String, String>,
}

/// Registry for ability management.
#[derive(Default)]
pub struct AbilityRegistry {
    inner: RwLock<Inner>,
}

impl AbilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an ability instance. A duplicate name overwrites the previous
    /// entry with a warning.
    pub fn register(&self, ability: Arc<dyn Ability>) {
        let name = ability.name().to_string();
        let mut inner = self.inner.write();
        if inner.abilities.contains_key(&name) {
            tracing::warn!(ability = %name, "ability already registered, overwriting");
        } else {
            inner.order.push(name.clone());
        }
        tracing::info!(ability = %name, display_name = %ability.display_name(), "registered ability");
        inner.abilities.insert(name, ability);
    }

    /// Register an ability owned by a plugin/module.
    pub fn register_owned(&self, ability: Arc<dyn Ability>, owner: &str) {
        let name = ability.name().to_string();
        self.register(ability);
        self.inner.write().owners.insert(name, owner.to_string());
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Ability>> {
        self.inner.read().abilities.get(name).cloned()
    }

    pub fn list_abilities(&self) -> Vec<String> {
        self.inner.read().order.clone()
    }

    pub fn get_ability_owner(&self, ability_name: &str) -> Option<String> {
        self.inner.read().owners.get(ability_name).cloned()
    }

    /// Remove one ability. Returns `false` when it was not registered.
    pub fn unregister(&self, name: &str) -> bool {
        let mut inner = self.inner.write();
        inner.owners.remove(name);
        inner.order.retain(|n| n != name);
        inner.abilities.remove(name).is_some()
    }

    /// Remove every ability owned by `owner`, returning the removed names.
    pub fn unregister_owned(&self, owner: &str) -> Vec<String> {
        let mut inner = self.inner.write();
        let names: Vec<String> = inner
            .owners
            .iter()
            .filter(|(_, o)| o.as_str() == owner)
            .map(|(name, _)| name.clone())
            .collect();
        for name in &names {
            inner.owners.remove(name);
            inner.order.retain(|n| n != name);
            inner.abilities.remove(name);
        }
        names
    }

    /// Tool schemas for every registered ability, in registration order.
    pub fn get_tool_schemas(&self) -> Vec<Value> {
        let inner = self.inner.read();
        inner
            .order
            .iter()
            .filter_map(|name| inner.abilities.get(name))
            .map(|ability| ability.to_tool_schema())
            .collect()
    }

    /// Execute an ability by name: permission check, parameter validation,
    /// then execution with errors captured into the result.
    pub async fn execute(
        &self,
        ability_name: &str,
        params: Value,
        context: &AbilityContext,
    ) -> AbilityResult {
        let Some(ability) = self.get(ability_name) else {
            return AbilityResult::err(format!("Ability '{ability_name}' not found"));
        };

        for permission in ability.required_permissions() {
            if !context.permissions.contains(&permission) {
                return AbilityResult::err(format!("Missing permission: {permission}"));
            }
        }

        if !ability.validate_params(&params).await {
            return AbilityResult::err("Invalid parameters");
        }

        ability.execute(params, context).await
    }

    /// Run `on_unload` for everything and clear the registry.
    pub async fn unload_all(&self) {
        let abilities: Vec<Arc<dyn Ability>> = {
            let inner = self.inner.read();
            inner.abilities.values().cloned().collect()
        };
        for ability in abilities {
            ability.on_unload().await;
        }
        let mut inner = self.inner.write();
        inner.abilities.clear();
        inner.order.clear();
        inner.owners.clear();
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use cerise_domain::ability::{AbilityCategory, AbilityType};

    use super::*;

    struct Gated {
        name: &'static str,
    }

    #[async_trait]
    impl Ability for Gated {
        fn name(&self) -> &str {
            self.name
        }
        fn display_name(&self) -> &str {
            "Gated"
        }
        fn description(&self) -> String {
            "Needs net permission.".into()
        }
        fn ability_type(&self) -> AbilityType {
            AbilityType::Builtin
        }
        fn category(&self) -> AbilityCategory {
            AbilityCategory::Network
        }
        fn parameters_schema(&self) -> Value {
            serde_json::json!({ "type": "object", "properties": {} })
        }
        fn required_permissions(&self) -> Vec<String> {
            vec!["net".into()]
        }
        async fn execute(&self, _params: Value, _context: &AbilityContext) -> AbilityResult {
            AbilityResult::ok("done")
        }
    }

    #[tokio::test]
    async fn missing_ability_yields_not_found() {
        let registry = AbilityRegistry::new();
        let result = registry
            .execute("nope", Value::Null, &AbilityContext::new("u", "s"))
            .await;
        assert!(!result.success);
        assert_eq!(result.error.unwrap(), "Ability 'nope' not found");
    }

    #[tokio::test]
    async fn permission_check_blocks_execution() {
        let registry = AbilityRegistry::new();
        registry.register(Arc::new(Gated { name: "g" }));

        let denied = registry
            .execute("g", Value::Null, &AbilityContext::new("u", "s"))
            .await;
        assert!(!denied.success);
        assert_eq!(denied.error.unwrap(), "Missing permission: net");

        let ctx = AbilityContext::new("u", "s").with_permissions(vec!["net".into()]);
        let allowed = registry.execute("g", Value::Null, &ctx).await;
        assert!(allowed.success);
    }

    #[tokio::test]
    async fn owned_abilities_unregister_together() {
        let registry = AbilityRegistry::new();
        registry.register_owned(Arc::new(Gated { name: "a" }), "plugin-x");
        registry.register_owned(Arc::new(Gated { name: "b" }), "plugin-x");
        registry.register(Arc::new(Gated { name: "c" }));

        assert_eq!(registry.get_ability_owner("a").unwrap(), "plugin-x");
        assert!(registry.get_ability_owner("c").is_none());

        let removed = registry.unregister_owned("plugin-x");
        assert_eq!(removed.len(), 2);
        assert!(registry.get("a").is_none());
        assert!(registry.get("b").is_none());
        assert!(registry.get("c").is_some());
    }

    #[tokio::test]
    async fn duplicate_registration_overwrites() {
        let registry = AbilityRegistry::new();
        registry.register(Arc::new(Gated { name: "dup" }));
        registry.register(Arc::new(Gated { name: "dup" }));
        assert_eq!(registry.list_abilities(), vec!["dup".to_string()]);
        assert_eq!(registry.get_tool_schemas().len(), 1);
    }
}
