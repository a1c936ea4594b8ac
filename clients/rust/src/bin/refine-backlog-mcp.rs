use std::process::ExitCode;

use clap::Parser;
use mcp_server::Router;
use secrecy::SecretString;
use tokio::io::{stdin, stdout};
use tracing_subscriber::EnvFilter;
use url::Url;

use refine_backlog_client::mcp::{ByteTransport, RefineRouter, RouterService, Server};
use refine_backlog_client::{RefineClient, DEFAULT_BASE_URL};

/// Refine Backlog as a Model Context Protocol tool over stdio.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Base URL of the Refine Backlog API
    #[arg(long, default_value = DEFAULT_BASE_URL)]
    api_base: Url,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // stdout carries the protocol, so logs go to stderr.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let license_key = std::env::var("REFINE_BACKLOG_KEY")
        .ok()
        .filter(|key| !key.trim().is_empty())
        .map(SecretString::from);

    let client = match RefineClient::new(&args.api_base, license_key) {
        Ok(client) => client,
        Err(e) => {
            tracing::error!("Failed to build API client: {e}");
            return ExitCode::FAILURE;
        }
    };
    let router = RefineRouter::new(client);
    tracing::info!(tools = router.list_tools().len(), "Router initialized");

    let server = Server::new(RouterService(router));
    let transport = ByteTransport::new(stdin(), stdout());

    tracing::info!("Refine Backlog MCP server running on stdio");
    match server.run(transport).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("MCP server stopped: {e}");
            ExitCode::FAILURE
        }
    }
}
