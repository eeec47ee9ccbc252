use clap::Parser;
use std::net::SocketAddr;
use tracing_subscriber::EnvFilter;

use jobq::config::{BrokerConfig, DEFAULT_PORT};
use jobq::server::BrokerServer;
use jobq::shutdown::install_shutdown_handler;

#[derive(Parser, Debug)]
#[command(name = "jobq")]
#[command(about = "A centralized priority job broker")]
struct Args {
    /// Port to listen on
    #[arg(long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Address to bind
    #[arg(long, default_value = "0.0.0.0")]
    bind: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let listen_addr: SocketAddr = format!("{}:{}", args.bind, args.port).parse()?;
    let config = BrokerConfig::new(listen_addr);

    tracing::info!(addr = %listen_addr, "Starting job broker");

    let shutdown = install_shutdown_handler();
    let server = BrokerServer::new(config);
    server.run(shutdown).await?;

    tracing::info!("Broker stopped");
    Ok(())
}
