use std::sync::Arc;

use discord_mcp_core::connections::discord::DiscordConnectionFactory;
use discord_mcp_core::AgentRegistry;
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use discord_mcp_server::config::ServerConfig;
use discord_mcp_server::supabase::RealtimeFeed;
use discord_mcp_server::tools::AgentService;
use discord_mcp_server::{stdio, sync};

#[tokio::main]
async fn main() -> std::io::Result<()> {
    // stdout carries the protocol; logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let config = ServerConfig::from_env();
    let factory = DiscordConnectionFactory::new(config.discord_api_base.clone());
    let registry = AgentRegistry::new(Arc::new(factory));

    if let Some((url, key)) = config.realtime() {
        let (updates_tx, updates_rx) = mpsc::channel(32);
        let feed = RealtimeFeed::new(url, key, config.table.clone(), updates_tx);
        tokio::spawn(feed.run());
        tokio::spawn(sync::run(registry.clone(), updates_rx));
        info!("watching table '{}' for configuration updates", config.table);
    } else {
        info!("SUPABASE_URL/SUPABASE_SERVICE_ROLE_KEY not set; running stdio-only");
    }

    info!("discord-mcp server listening on stdio");
    stdio::serve(
        AgentService::new(registry),
        tokio::io::stdin(),
        tokio::io::stdout(),
    )
    .await
}
