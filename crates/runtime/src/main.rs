use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use cerise_abilities::CapabilityScheduler;
use cerise_dialogue::ChatOverrides;
use cerise_domain::config::env_vars;
use cerise_mcp::McpStdioAbilityServer;
use cerise_runtime::{config, Runtime};

#[derive(Parser)]
#[command(name = "cerise", about = "Cerise agent runtime", version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the full runtime until interrupted.
    Serve,
    /// One-shot chat turn against the configured provider.
    Chat {
        /// Message to send.
        message: String,
        /// Session id to use.
        #[arg(long, default_value = "cli")]
        session: String,
    },
    /// Expose the ability registry as an MCP stdio server.
    McpServe {
        /// Permissions granted to tool executions.
        #[arg(long)]
        permission: Vec<String>,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    match cli.command {
        None | Some(Command::Serve) => block_on(serve()),
        Some(Command::Chat { message, session }) => block_on(chat(message, session)),
        Some(Command::McpServe { permission }) => mcp_serve(permission),
    }
}

fn block_on(future: impl std::future::Future<Output = anyhow::Result<()>>) -> anyhow::Result<()> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(future)
}

async fn serve() -> anyhow::Result<()> {
    let mut runtime = build_runtime().await?;
    runtime.start().await?;
    tokio::signal::ctrl_c().await?;
    tracing::info!("interrupt received, shutting down");
    runtime.shutdown().await;
    Ok(())
}

async fn chat(message: String, session: String) -> anyhow::Result<()> {
    let mut runtime = build_runtime().await?;
    runtime.start().await?;
    let reply = runtime
        .dialogue
        .chat(&session, &message, ChatOverrides::default())
        .await?;
    println!("{reply}");
    runtime.shutdown().await;
    Ok(())
}

/// MCP server mode: the serve loop owns the process's stdio, so the runtime
/// is built on a scratch tokio runtime first and the loop runs blocking.
fn mcp_serve(permissions: Vec<String>) -> anyhow::Result<()> {
    let scratch = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let runtime = scratch.block_on(async {
        let mut runtime = build_runtime().await?;
        runtime.start().await?;
        Ok::<_, anyhow::Error>(runtime)
    })?;

    let scheduler: Arc<CapabilityScheduler> = Arc::clone(&runtime.scheduler);
    let server = McpStdioAbilityServer::new(SchedulerSource(scheduler))
        .with_permissions(permissions)
        .with_defaults("mcp", "mcp");
    server.serve_blocking(std::io::stdin().lock(), std::io::stdout().lock())?;
    Ok(())
}

/// Adapter handing the scheduler to the MCP server by reference.
struct SchedulerSource(Arc<CapabilityScheduler>);

#[async_trait::async_trait]
impl cerise_mcp::AbilityToolSource for SchedulerSource {
    fn tool_schemas(&self) -> Vec<serde_json::Value> {
        self.0.get_tool_schemas()
    }

    async fn execute_tool(
        &self,
        name: &str,
        params: serde_json::Value,
        context: &cerise_domain::ability::AbilityContext,
    ) -> cerise_domain::ability::AbilityResult {
        self.0.execute(name, params, context).await
    }
}

async fn build_runtime() -> anyhow::Result<Runtime> {
    let data_dir = config::data_dir();
    let app_config = config::load_app_config(&data_dir)?;
    let providers_config = config::load_providers_config(&data_dir)?;
    Ok(Runtime::build(app_config, providers_config).await?)
}

fn init_tracing() {
    let default_level = std::env::var(env_vars::LOG_LEVEL).unwrap_or_else(|_| "info".into());
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));
    // MCP serve mode owns stdout for framing; logs must go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
