//! Runtime wiring: build every component from configuration and connect
//! them through the bus.
//!
//! One `Runtime` value owns the service graph; nothing lives in globals.

use std::sync::Arc;

use cerise_abilities::{AbilityRegistry, CapabilityScheduler};
use cerise_agents::AgentService;
use cerise_dialogue::{DialogueEngine, ProactiveChatService};
use cerise_domain::config::{AppConfig, ProvidersConfig};
use cerise_domain::error::Result;
use cerise_events::MessageBus;
use cerise_mcp::McpManager;
use cerise_memory::{
    context::MemoryContextBuilder,
    extract::build_extractor,
    layers::{build_core_profile_layer, build_procedural_habits_layer, build_semantic_facts_layer},
    maintenance::MaintenanceTask,
    LayerWriter, MemoryEngine, MemoryPipeline,
};
use cerise_plugins::{PluginDepsJobs, PluginInstaller, PluginManager, PluginsJson};
use cerise_providers::ProviderRegistry;
use cerise_skills::SkillService;
use cerise_state::StateStore;

use crate::admin::AdminGuard;
use crate::builtin::ScriptRunnerAbility;

pub struct Runtime {
    pub config: AppConfig,
    pub bus: Arc<MessageBus>,
    pub state: StateStore,
    pub providers: Arc<ProviderRegistry>,
    pub registry: Arc<AbilityRegistry>,
    pub scheduler: Arc<CapabilityScheduler>,
    pub memory: Arc<MemoryEngine>,
    pub skills: Arc<SkillService>,
    pub dialogue: Arc<DialogueEngine>,
    pub agents: Arc<AgentService>,
    pub proactive: Arc<ProactiveChatService>,
    pub plugin_manager: Arc<PluginManager>,
    pub plugin_installer: Arc<PluginInstaller>,
    pub plugin_deps: Arc<PluginDepsJobs>,
    pub admin: AdminGuard,
    mcp_manager: McpManager,
    maintenance: Option<MaintenanceTask>,
}

impl Runtime {
    /// Build the full service graph. Nothing is started yet; call
    /// [`Runtime::start`] to launch the bus, plugins, and schedulers.
    pub async fn build(config: AppConfig, providers_config: ProvidersConfig) -> Result<Self> {
        let bus = Arc::new(MessageBus::new());
        let state = StateStore::new(&config.memory.store.state_path);

        let providers = Arc::new(ProviderRegistry::new());
        providers.load_from_config(&providers_config);

        // Abilities and policy.
        let registry = Arc::new(AbilityRegistry::new());
        registry.register(Arc::new(ScriptRunnerAbility::new("python3")));
        let scheduler = Arc::new(CapabilityScheduler::new(
            Arc::clone(&registry),
            config.capabilities.clone(),
            Some(config.stars.clone()),
        ));

        // Memory engine and layered stores.
        let memory = Arc::new(MemoryEngine::from_config(
            config.memory.clone(),
            Some(Arc::clone(&providers)),
            Some(Arc::clone(&bus)),
        )?);
        let core_profiles = build_core_profile_layer(&config.memory.l1_core)?;
        let semantic_facts = build_semantic_facts_layer(&config.memory.l2_semantic)?;
        let procedural_habits = build_procedural_habits_layer(&config.memory.l4_procedural)?;

        let mut context_builder = MemoryContextBuilder::new(config.memory.context.clone());
        context_builder.core_profiles = core_profiles.clone();
        context_builder.facts = semantic_facts.clone();
        context_builder.habits = procedural_habits.clone();
        let context_builder = Arc::new(context_builder);

        let pipeline = MemoryPipeline::new(
            Arc::clone(&bus),
            memory.store(),
            Arc::from(build_extractor(
                &config.memory.pipeline,
                Some(Arc::clone(&providers)),
            )),
        );
        pipeline.attach()?;
        let layer_writer = LayerWriter::new(
            Arc::clone(&bus),
            core_profiles,
            semantic_facts,
            procedural_habits,
        );
        layer_writer.attach()?;

        // Skills.
        let skills = {
            let service = SkillService::new(&state);
            match providers.find_with_capability(cerise_providers::CapabilityKind::Embeddings) {
                Some(embedder) => Arc::new(service.with_embeddings(embedder, None)),
                None => Arc::new(service),
            }
        };

        // Dialogue engine.
        let dialogue = Arc::new(
            DialogueEngine::new(config.dialogue.clone(), Arc::clone(&providers))
                .with_scheduler(Arc::clone(&scheduler))
                .with_memory(Arc::clone(&memory), Arc::clone(&context_builder))
                .with_skills(Arc::clone(&skills))
                .with_bus(Arc::clone(&bus)),
        );

        // Agents and proactive chat.
        let agents = Arc::new(AgentService::new(
            &state,
            Arc::clone(&bus),
            Arc::clone(&dialogue),
        ));
        let proactive_state = StateStore::new(&config.proactive.state_path);
        let proactive = ProactiveChatService::new(
            Arc::clone(&bus),
            Arc::clone(&dialogue),
            config.proactive.clone(),
            proactive_state,
        );
        proactive.attach()?;

        // Plugins.
        let plugins_dir = config.plugins.plugins_dir.clone();
        let plugin_manager = Arc::new(
            PluginManager::new(&plugins_dir, Arc::clone(&registry))
                .with_venv_dir(&config.plugins.python_venv_dir),
        );
        let plugin_deps = Arc::new(
            PluginDepsJobs::new(state.clone(), &plugins_dir)
                .with_venv_dir(&config.plugins.python_venv_dir),
        );
        let registry_file = PluginsJson::new(
            std::path::Path::new(&plugins_dir)
                .parent()
                .unwrap_or(std::path::Path::new("."))
                .join("plugins.json"),
        );
        let plugin_installer = Arc::new(PluginInstaller::new(&plugins_dir, registry_file));

        Ok(Self {
            admin: AdminGuard::from_env(),
            mcp_manager: McpManager::new(),
            maintenance: None,
            config,
            bus,
            state,
            providers,
            registry,
            scheduler,
            memory,
            skills,
            dialogue,
            agents,
            proactive,
            plugin_manager,
            plugin_installer,
            plugin_deps,
        })
    }

    /// Start the bus, warm the memory indexes, load plugins and MCP servers,
    /// and arm the proactive scheduler.
    pub async fn start(&mut self) -> Result<()> {
        self.bus.start().await;
        self.memory.prepare().await?;

        if self.config.plugins.enabled {
            let results = self
                .plugin_manager
                .load_all(&self.config.plugins.config)
                .await;
            for (plugin, ok) in results {
                if !ok {
                    tracing::warn!(plugin = %plugin, "plugin did not load");
                }
            }
        }

        self.mcp_manager
            .load_and_register(&self.config.mcp, &self.registry)
            .await;

        self.proactive.start().await?;

        if self.config.memory.maintenance.enabled {
            self.maintenance = Some(MaintenanceTask::spawn(
                self.memory.store(),
                std::time::Duration::from_secs(self.config.memory.maintenance.interval_seconds),
            ));
        }

        tracing::info!(
            abilities = self.registry.list_abilities().len(),
            providers = self.providers.list_instances().len(),
            mcp_servers = self.mcp_manager.server_count(),
            "runtime started"
        );
        Ok(())
    }

    /// Orderly shutdown: schedulers first, then plugins and MCP servers,
    /// finally the bus.
    pub async fn shutdown(&mut self) {
        self.proactive.shutdown().await;
        if let Some(task) = self.maintenance.take() {
            task.stop().await;
        }
        self.plugin_manager.unload_all().await;
        self.mcp_manager.close().await;
        self.bus.wait_empty().await;
        self.bus.stop().await;
        tracing::info!("runtime stopped");
    }
}
