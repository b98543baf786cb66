use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

mod bootstrap;
mod cli;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = cli::CliArgs::parse();
    let boot = bootstrap::bootstrap(args).await?;

    let bind = format!("{}:{}", boot.state.config.host, boot.state.config.port);
    let app = gw_router::router(boot.state);

    let listener = tokio::net::TcpListener::bind(&bind).await?;
    tracing::info!(%bind, "listening");
    axum::serve(listener, app).await?;
    Ok(())
}
