#![deny(warnings)]
#![deny(clippy::unwrap_used)]

use std::time::Duration;

use dotenv::dotenv;
use poem::{EndpointExt, Route, Server, listener::TcpListener, middleware::Tracing};
use poem_mcpserver::{McpServer, streamable_http};
use ssh_bootstrap_mcp::mcp::commands::RetryPolicy;
use ssh_bootstrap_mcp::mcp::config::resolve_mcp_port;
use ssh_bootstrap_mcp::mcp::{McpSSHCommands, RegistryConfig};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Grace period for in-flight requests after a shutdown signal
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = RegistryConfig::from_env();
    let commands = McpSSHCommands::from_config(&config);
    let registry = commands.registry();
    let retry = RetryPolicy {
        max_retries: config.max_retries,
        min_delay: config.retry_delay,
    };

    let mcp_addr = format!("0.0.0.0:{}", resolve_mcp_port(None));
    info!("Starting MCP server on {}", mcp_addr);

    // Every MCP session shares the one registry
    let shared = registry.clone();
    let app = Route::new()
        .at(
            "/",
            streamable_http::endpoint(move |_| {
                McpServer::new().tools(McpSSHCommands::new(shared.clone(), retry))
            }),
        )
        .with(Tracing);

    info!("MCP Server with SSH key bootstrap is ready");
    info!("Use the ssh_connect command to establish SSH connections");

    Server::new(TcpListener::bind(mcp_addr))
        .name("SSH Bootstrap MCP Server")
        .run_with_graceful_shutdown(
            app,
            async {
                let _ = tokio::signal::ctrl_c().await;
                info!("Shutdown signal received");
            },
            Some(SHUTDOWN_GRACE),
        )
        .await?;

    let closed = registry.disconnect_all().await;
    info!("Server stopped, closed {} SSH session(s)", closed);

    Ok(())
}
