//! `jarvis` command line: runs the agent manager and talks to its agents.

mod config;

use clap::{Parser, Subcommand};
use config::JarvisConfig;
use jarvis_broker::{MemoryBroker, MessageChannel};
use jarvis_core::{Capability, Parameters};
use jarvis_manager::{AgentFactory, AgentManager};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "jarvis", about = "Jarvis multi-agent orchestration core")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "jarvis.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the manager and its agents until interrupted
    Run {
        /// Print system health every N seconds (0 disables)
        #[arg(long, default_value_t = 0)]
        report_every: u64,
    },
    /// Start the system, submit one task and print its response
    Submit {
        /// Target capability (e.g. utility, research)
        #[arg(long, default_value = "utility")]
        capability: Capability,
        /// Task type understood by the capability's agents
        #[arg(long)]
        task_type: String,
        /// Task parameters as a JSON object
        #[arg(long, default_value = "{}")]
        params: String,
        /// Higher is sooner
        #[arg(long, default_value_t = 1)]
        priority: i32,
        /// Seconds to wait for the response
        #[arg(long, default_value_t = 30)]
        wait: u64,
    },
    /// Start the system and print its health and statistics
    Health,
    /// List the agent types this build can spawn
    Types,
}

fn build_manager(config: &JarvisConfig) -> anyhow::Result<Arc<AgentManager>> {
    let broker = Arc::new(MemoryBroker::new());
    let channel = MessageChannel::with_names(broker, config.channel_names())
        .with_response_timeout(config.response_timeout());
    Ok(Arc::new(AgentManager::new(
        config.manager_config()?,
        AgentFactory::with_builtins(),
        Arc::new(channel),
    )))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    let cli = Cli::parse();
    let config = JarvisConfig::load(&cli.config).map_err(|e| {
        anyhow::anyhow!("Failed to load config '{}': {}", cli.config.display(), e)
    })?;

    match cli.command {
        Commands::Run { report_every } => {
            let manager = build_manager(&config)?;
            manager.start().await?;
            info!(agents = manager.agent_ids().await.len(), "Jarvis running, press Ctrl-C to stop");

            if report_every > 0 {
                let mut ticker = tokio::time::interval(Duration::from_secs(report_every));
                loop {
                    tokio::select! {
                        _ = tokio::signal::ctrl_c() => break,
                        _ = ticker.tick() => {
                            let health = manager.get_system_health().await;
                            println!("{}", serde_json::to_string(&health)?);
                        }
                    }
                }
            } else {
                tokio::signal::ctrl_c().await?;
            }

            info!("Shutdown requested");
            manager.stop().await?;
        }
        Commands::Submit {
            capability,
            task_type,
            params,
            priority,
            wait,
        } => {
            let parameters: Parameters = serde_json::from_str(&params)
                .map_err(|e| anyhow::anyhow!("--params must be a JSON object: {}", e))?;

            let manager = build_manager(&config)?;
            manager.start().await?;
            let response = manager
                .request_task(capability, &task_type, parameters, priority, Duration::from_secs(wait))
                .await;
            manager.stop().await?;

            match response? {
                Some(response) => println!("{}", serde_json::to_string_pretty(&response)?),
                None => anyhow::bail!("No response for '{}' within {}s", task_type, wait),
            }
        }
        Commands::Health => {
            let manager = build_manager(&config)?;
            manager.start().await?;
            manager.update_statistics().await;
            let report = serde_json::json!({
                "health": manager.get_system_health().await,
                "statistics": manager.get_statistics().await,
                "agents": manager.get_agent_capabilities().await,
            });
            manager.stop().await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Types => {
            let factory = AgentFactory::with_builtins();
            for agent_type in factory.agent_types() {
                println!("{agent_type}");
            }
        }
    }

    Ok(())
}
