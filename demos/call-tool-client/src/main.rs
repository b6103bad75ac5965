//! # Call Tool Client
//!
//! Connects to one MCP backend, prints the tool catalog, calls a single tool
//! and prints the normalized content.
//!
//! ## Usage
//!
//! ```bash
//! # Streamable HTTP (default)
//! cargo run --package call-tool-client -- --url http://localhost:3100/mcp search '{"query": "rust"}'
//!
//! # Legacy SSE
//! cargo run --package call-tool-client -- --transport sse --url http://localhost:3100/sse search
//!
//! # Child process over stdio
//! cargo run --package call-tool-client -- --transport stdio --command vestige-mcp --data-dir ./data search
//! ```

use anyhow::{Context, Result, bail};
use clap::{Parser, ValueEnum};
use serde_json::Value;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};
use vestige_mcp_client::config::DEFAULT_ENDPOINT;
use vestige_mcp_client::prelude::*;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum TransportKind {
    StreamableHttp,
    Sse,
    Stdio,
}

#[derive(Parser)]
#[command(name = "call-tool-client", about = "Call one tool on an MCP backend")]
struct Args {
    /// Transport used to reach the backend
    #[arg(short, long, value_enum, default_value = "streamable-http")]
    transport: TransportKind,

    /// Backend URL for the HTTP transports
    #[arg(short, long, default_value = DEFAULT_ENDPOINT)]
    url: String,

    /// Backend executable for the stdio transport
    #[arg(long, default_value = "vestige-mcp")]
    command: String,

    /// Data directory handed to the stdio backend
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Per-request timeout in seconds
    #[arg(long, default_value_t = 30)]
    timeout: u64,

    /// Tool to call; omit to only list tools
    tool: Option<String>,

    /// Tool arguments (JSON object)
    #[arg(default_value = "{}")]
    arguments: String,
}

impl Args {
    fn client_config(&self) -> ClientConfig {
        let config = match self.transport {
            TransportKind::StreamableHttp => ClientConfig::streamable_http(&self.url),
            TransportKind::Sse => ClientConfig::sse(&self.url),
            TransportKind::Stdio => {
                let config = ClientConfig::stdio(&self.command);
                match &self.data_dir {
                    Some(dir) => config.with_data_dir(dir),
                    None => config,
                }
            }
        };
        config.with_request_timeout(Duration::from_secs(self.timeout))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let arguments: Value =
        serde_json::from_str(&args.arguments).context("Tool arguments must be valid JSON")?;
    if !arguments.is_object() {
        bail!("Tool arguments must be a JSON object");
    }

    let client = McpClient::new(args.client_config()).context("Invalid client configuration")?;
    client.start().await.context("Failed to connect to MCP backend")?;

    let status = client.connection_status().await;
    info!("{}", status.summary());
    println!("Tools: {}", client.tool_names().join(", "));

    let outcome = match &args.tool {
        Some(tool) => call(&client, tool, arguments).await,
        None => Ok(()),
    };

    if let Err(e) = client.stop().await {
        warn!(error = %e, "Shutdown did not complete cleanly");
    }
    outcome
}

async fn call(client: &McpClient, tool: &str, arguments: Value) -> Result<()> {
    match client.call_tool(tool, arguments).await {
        Ok(output) => {
            for fragment in &output.content {
                match &fragment.text {
                    Some(text) => println!("{}", text),
                    None => println!("[{} content]", fragment.kind),
                }
            }
            Ok(())
        }
        Err(McpClientError::Tool(message)) => bail!("Tool '{}' failed: {}", tool, message),
        Err(e) => Err(e).with_context(|| format!("Calling '{}' failed", tool)),
    }
}
