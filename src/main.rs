use clap::Parser;
use std::path::PathBuf;

use bandwidth_hero_proxy::config::Config;
use bandwidth_hero_proxy::logging;
use bandwidth_hero_proxy::server::ProxyServer;

/// Bandwidth Hero Proxy - fetches remote images and re-encodes them as
/// lossy WebP/JPEG for bandwidth-constrained clients
#[derive(Parser, Debug)]
#[command(name = "bandwidth-hero-proxy")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Bind address override
    #[arg(short, long)]
    address: Option<String>,

    /// Listen port override
    #[arg(short, long)]
    port: Option<u16>,

    /// Emit JSON-formatted logs
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    logging::init_subscriber(args.log_json)?;

    let mut config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    if let Some(address) = args.address {
        config.server.address = address;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }

    tracing::info!(
        address = %config.listen_addr(),
        workers = config.transcoder.resolved_concurrency(),
        "configuration loaded"
    );

    let server = ProxyServer::bind(&config).await?;
    tracing::info!(address = %server.local_addr(), "Starting Bandwidth Hero proxy");

    tokio::select! {
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
        }
    }

    Ok(())
}
