use anyhow::{Context, Result};
use clap::Parser;
use gw_agent::AgentClient;
use tracing_subscriber::EnvFilter;

/// Runs the browser-side agent standalone, dialing the gateway's control
/// channel and forwarding descriptors to the upstream Google API.
#[derive(Debug, Clone, Parser)]
#[command(name = "gatewarden-agent", version)]
struct Cli {
    #[arg(long, env = "GATEWAY_WS_URL", default_value = "ws://127.0.0.1:8787/agent/ws")]
    gateway_ws_url: String,

    /// Path to the initial credential blob.
    #[arg(long, env = "CREDENTIAL_FILE")]
    credential_file: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let raw = std::fs::read_to_string(&cli.credential_file)
        .with_context(|| format!("reading credential file {}", cli.credential_file))?;
    let credential: serde_json::Value = serde_json::from_str(&raw).context("parsing credential blob")?;

    let client = AgentClient::new(cli.gateway_ws_url, credential);
    client.run().await;
    Ok(())
}
