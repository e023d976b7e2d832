#![deny(warnings)]
#![deny(clippy::unwrap_used)]

use dotenv::dotenv;
use poem_mcpserver::McpServer;
use ssh_bootstrap_mcp::mcp::{McpSSHCommands, RegistryConfig};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();

    // stdout carries the protocol; logs go to stderr
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let commands = McpSSHCommands::from_config(&RegistryConfig::from_env());
    let registry = commands.registry();

    poem_mcpserver::stdio::stdio(McpServer::new().tools(commands)).await?;

    registry.disconnect_all().await;
    Ok(())
}
