use clap::Parser;
use tracing_subscriber::EnvFilter;

use broker_lite::config::{DbConfig, WorkerConfig, DEFAULT_MASTER_PORT};
use broker_lite::db;
use broker_lite::shutdown::install_shutdown_handler;
use broker_lite::worker::WorkerNode;

#[derive(Parser, Debug)]
#[command(name = "broker-worker")]
#[command(about = "Serves the calendar store to one paired client at a time")]
struct Args {
    /// Master host to register with
    #[arg(long, default_value = "127.0.0.1")]
    master_host: String,

    /// Master port
    #[arg(long, default_value_t = DEFAULT_MASTER_PORT)]
    master_port: u16,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    // DBHOST, DBNAME, DBUSR, DBPASS: absence of any is fatal.
    let db_config = match DbConfig::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::error!(error = %e, "database configuration missing");
            std::process::exit(1);
        }
    };
    let db = match db::spawn(&db_config) {
        Ok(handle) => handle,
        Err(e) => {
            tracing::error!(error = %e, "database open failed");
            std::process::exit(1);
        }
    };

    let config = WorkerConfig::new(format!("{}:{}", args.master_host, args.master_port));
    let shutdown = install_shutdown_handler();
    let node = WorkerNode::new(config, db, shutdown);

    if let Err(e) = node.run().await {
        tracing::error!(error = %e, "worker failed");
        std::process::exit(e.exit_code());
    }
}
