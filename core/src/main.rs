/// Foundlink board messaging service - Main entry point
use foundlink_core::{api, ChatService, Config};
use std::env;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Parse configuration
    let args: Vec<String> = env::args().collect();
    let config = Config::from_args(&args)
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;

    let service = ChatService::open(&config)
        .map_err(|e| anyhow::anyhow!("Store error: {}", e))?;

    info!("🚀 Starting Foundlink messaging service");
    info!("   Data dir: {:?}", config.resolved_data_dir());
    info!("   Listening on: {}", config.listen_addr);

    // Serve the board API (this will block until the process is stopped)
    api::start_api(service, config.listen_addr)
        .await
        .map_err(|e| anyhow::anyhow!("API error: {}", e))?;

    Ok(())
}
