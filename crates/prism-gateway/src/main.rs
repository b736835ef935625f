use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use prism_gateway::{config, error::GatewayResult, gateway};

#[derive(Parser, Debug)]
#[command(author, version, about = "Agent gateway daemon")]
struct Args {
    /// Address to bind, overriding the config file.
    #[arg(long)]
    addr: Option<String>,

    /// Path to the config file (default: PRISM_CONFIG or ./prism.toml).
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> GatewayResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("prism_gateway=info,tower_http=info")),
        )
        .init();

    let args = Args::parse();
    let mut cfg = match &args.config {
        Some(path) => config::load_config(path)?,
        None => config::load_default_config()?,
    };
    if let Some(addr) = args.addr {
        cfg.server.addr = addr;
    }

    if !cfg.credentials.is_valid() {
        tracing::warn!("ANTHROPIC_API_KEY is not configured; turns will fail to authenticate");
    }

    gateway::start_gateway(cfg).await
}
