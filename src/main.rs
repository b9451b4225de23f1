use anyhow::Result;
use clap::Parser;
use slidegate::config::{Config, StoreBackend};
use slidegate::server::Server;
use std::net::SocketAddr;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Distributed sliding-window rate limiting service.
///
/// Settings come from the environment (and `.env`); flags override them.
#[derive(Debug, Parser)]
#[command(name = "slidegate", version, about)]
struct Cli {
    /// Address to listen on (overrides BIND_ADDR)
    #[arg(long)]
    bind: Option<SocketAddr>,

    /// `redis` or `memory` (overrides STORE_BACKEND)
    #[arg(long, value_parser = parse_backend)]
    store: Option<StoreBackend>,

    /// Log level (overrides LOG_LEVEL)
    #[arg(long)]
    log_level: Option<String>,
}

fn parse_backend(s: &str) -> Result<StoreBackend, String> {
    s.parse()
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    let cli = Cli::parse();

    let mut config = Config::from_env_unchecked()
        .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))?;
    if let Some(bind) = cli.bind {
        config.bind_addr = bind;
    }
    if let Some(store) = cli.store {
        config.store_backend = store;
    }
    if let Some(level) = cli.log_level {
        config.log_level = level;
    }
    config
        .check()
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {}", e))?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("slidegate={},tower_http=debug", config.log_level).into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting slidegate");
    tracing::info!(
        "Configuration: bind_addr={}, store={}, redis_host={}, region={}",
        config.bind_addr,
        config.store_backend,
        config.redis_host,
        config.region
    );

    let server = Server::new(config)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create server: {}", e))?;

    server
        .run()
        .await
        .map_err(|e| anyhow::anyhow!("Server error: {}", e))?;

    Ok(())
}
