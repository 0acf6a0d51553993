//! Provider registry.
//!
//! Builds and caches provider instances from configuration. Concrete adapters
//! register a builder per provider type; entries that fail to build are
//! logged and skipped rather than aborting startup.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use cerise_domain::config::{ProviderConfig, ProvidersConfig};
use cerise_domain::error::{Error, Result};

use crate::traits::Provider;

/// Factory producing a provider instance from its config entry.
pub type ProviderBuilder =
    Box<dyn Fn(&ProviderConfig) -> Result<Arc<dyn Provider>> + Send + Sync>;

/// One capability a caller may require of a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapabilityKind {
    Chat,
    Streaming,
    FunctionCalling,
    Vision,
    Embeddings,
    Rerank,
}

#[derive(Default)]
struct Inner {
    builders: HashMap<String, ProviderBuilder>,
    instances: HashMap<String, Arc<dyn Provider>>,
    configs: HashMap<String, ProviderConfig>,
    default_provider: Option<String>,
}

/// Registry of provider instances. Passed explicitly through the runtime
/// rather than living in a global.
#[derive(Default)]
pub struct ProviderRegistry {
    inner: RwLock<Inner>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a builder for a provider type name.
    pub fn register_builder(&self, provider_type: impl Into<String>, builder: ProviderBuilder) {
        let provider_type = provider_type.into();
        tracing::info!(provider_type = %provider_type, "registered provider type");
        self.inner.write().builders.insert(provider_type, builder);
    }

    /// Instantiate every enabled config entry through its builder and cache
    /// the instances. Builder failures are logged and skipped.
    pub fn load_from_config(&self, config: &ProvidersConfig) {
        for provider_config in &config.providers {
            if !provider_config.enabled {
                continue;
            }
            let result = {
                let inner = self.inner.read();
                match inner.builders.get(&provider_config.provider_type) {
                    Some(builder) => builder(provider_config),
                    None => Err(Error::Config(format!(
                        "unknown provider type: {}",
                        provider_config.provider_type
                    ))),
                }
            };
            match result {
                Ok(instance) => {
                    tracing::info!(
                        provider_id = %provider_config.id,
                        provider_type = %provider_config.provider_type,
                        "created provider"
                    );
                    let mut inner = self.inner.write();
                    inner
                        .configs
                        .insert(provider_config.id.clone(), provider_config.clone());
                    inner
                        .instances
                        .insert(provider_config.id.clone(), instance);
                }
                Err(e) => {
                    tracing::warn!(
                        provider_id = %provider_config.id,
                        error = %e,
                        "failed to create provider, skipping"
                    );
                }
            }
        }

        let mut inner = self.inner.write();
        if let Some(default) = &config.default {
            if inner.instances.contains_key(default) {
                inner.default_provider = Some(default.clone());
            }
        }
        if inner.default_provider.is_none() {
            inner.default_provider = inner.instances.keys().next().cloned();
        }
    }

    /// Cache an already-built instance (used by tests and embedding layers).
    pub fn insert(&self, provider_id: impl Into<String>, provider: Arc<dyn Provider>) {
        let provider_id = provider_id.into();
        let mut inner = self.inner.write();
        if inner.default_provider.is_none() {
            inner.default_provider = Some(provider_id.clone());
        }
        inner.instances.insert(provider_id, provider);
    }

    pub fn get(&self, provider_id: &str) -> Option<Arc<dyn Provider>> {
        self.inner.read().instances.get(provider_id).cloned()
    }

    pub fn get_default(&self) -> Option<Arc<dyn Provider>> {
        let inner = self.inner.read();
        inner
            .default_provider
            .as_ref()
            .and_then(|id| inner.instances.get(id).cloned())
    }

    /// Resolve by id, falling back to the default when `provider_id` is
    /// `None` or empty.
    pub fn resolve(&self, provider_id: Option<&str>) -> Option<Arc<dyn Provider>> {
        match provider_id {
            Some(id) if !id.is_empty() => self.get(id),
            _ => self.get_default(),
        }
    }

    pub fn set_default(&self, provider_id: &str) -> Result<()> {
        let mut inner = self.inner.write();
        if !inner.instances.contains_key(provider_id) {
            return Err(Error::NotFound(format!(
                "provider not instantiated: {provider_id}"
            )));
        }
        inner.default_provider = Some(provider_id.to_string());
        Ok(())
    }

    pub fn list_instances(&self) -> Vec<String> {
        self.inner.read().instances.keys().cloned().collect()
    }

    /// First provider advertising the requested capability.
    pub fn find_with_capability(&self, kind: CapabilityKind) -> Option<Arc<dyn Provider>> {
        let inner = self.inner.read();
        inner
            .instances
            .values()
            .find(|p| {
                let caps = p.capabilities();
                match kind {
                    CapabilityKind::Chat => caps.chat,
                    CapabilityKind::Streaming => caps.streaming,
                    CapabilityKind::FunctionCalling => caps.function_calling,
                    CapabilityKind::Vision => caps.vision,
                    CapabilityKind::Embeddings => caps.embeddings,
                    CapabilityKind::Rerank => caps.rerank,
                }
            })
            .cloned()
    }
}
