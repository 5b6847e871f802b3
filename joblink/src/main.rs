mod engines;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, ValueEnum};
use tracing::info;

use joblink_core::config::UpstreamConfig;
use joblink_core::{logging, Config, Engine, Relay};

use engines::{DispatchEngine, TickerEngine};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Role {
    /// Relay pulled jobs to downstream subscribers, round-robin
    Relay,
    /// Generate timestamped jobs on an interval (no upstream needed)
    Source,
}

#[derive(Parser)]
#[command(name = "joblink", version, about = "Composable job relay node")]
struct Cli {
    /// Config file path (YAML/TOML/JSON); env vars override it
    #[arg(short, long, env = "JOBLINK_CONFIG_FILE")]
    config: Option<String>,

    /// Override the listen address from the config
    #[arg(long)]
    listen: Option<String>,

    /// Override the upstream address from the config
    #[arg(long)]
    upstream: Option<String>,

    #[arg(long, value_enum, default_value = "relay")]
    role: Role,

    /// Seconds between generated jobs in the source role
    #[arg(long, default_value_t = 1)]
    tick_seconds: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(listen) = cli.listen {
        config.node.listen = listen;
    }
    if let Some(address) = cli.upstream {
        match &mut config.upstream {
            Some(upstream) => upstream.address = address,
            None => {
                config.upstream = Some(UpstreamConfig {
                    address,
                    ..UpstreamConfig::default()
                });
            }
        }
    }

    // Fail fast on misconfigurations
    if let Err(errors) = config.validate() {
        for e in &errors {
            eprintln!("Config validation error: {e}");
        }
        anyhow::bail!("configuration validation failed with {} error(s)", errors.len());
    }

    logging::init_logging(&config.logging)?;
    info!(listen = %config.node.listen, role = ?cli.role, "joblink node starting");

    let engine: Arc<dyn Engine> = match cli.role {
        Role::Relay => Arc::new(DispatchEngine::new()),
        Role::Source => Arc::new(TickerEngine::new(Duration::from_secs(cli.tick_seconds))),
    };

    let relay = Relay::new(config, engine);
    let handle = relay.handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, requesting shutdown");
            handle.shutdown();
        }
    });

    relay.run().await?;
    Ok(())
}
