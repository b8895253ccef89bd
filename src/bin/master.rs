use clap::Parser;
use std::net::SocketAddr;
use tracing_subscriber::EnvFilter;

use broker_lite::config::{MasterConfig, DEFAULT_MASTER_PORT};
use broker_lite::master::MasterNode;
use broker_lite::shutdown::install_shutdown_handler;

#[derive(Parser, Debug)]
#[command(name = "broker-master")]
#[command(about = "Pairs waiting clients with available workers, FIFO per side")]
struct Args {
    /// Address to listen on
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Port to listen on
    #[arg(long, default_value_t = DEFAULT_MASTER_PORT)]
    port: u16,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let listen_addr: SocketAddr = match format!("{}:{}", args.host, args.port).parse() {
        Ok(addr) => addr,
        Err(e) => {
            tracing::error!(error = %e, "invalid listen address");
            std::process::exit(1);
        }
    };

    let shutdown = install_shutdown_handler();
    let node = MasterNode::new(MasterConfig::new(listen_addr), shutdown);

    if let Err(e) = node.run().await {
        tracing::error!(error = %e, "master failed");
        std::process::exit(e.exit_code());
    }
}
