//! SqlGuard MCP - Guarded SQL access over stdio

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use rmcp::ServiceExt;
use sqlguard_mcp::{init::init_tracing, Config, SqlGuardServer};

#[derive(Parser, Debug)]
#[command(name = "sqlguard-mcp", version, about = "Guarded SQL access MCP server")]
struct Args {
    /// Path to a TOML config file
    #[arg(long, env = "SQLGUARD_CONFIG_PATH")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    init_tracing("sqlguard_mcp")?;

    tracing::info!("Starting sqlguard_mcp MCP Server");

    let config = Config::load(args.config.as_deref()).context("Failed to load configuration")?;
    let server = SqlGuardServer::from_config(&config).context("Failed to open database backend")?;
    let service = server.serve(rmcp::transport::stdio()).await?;

    tracing::info!("Server running, waiting for requests...");

    service.waiting().await?;

    tracing::info!("Server shutting down");
    Ok(())
}
