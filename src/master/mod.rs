//! The master: accepts client and worker connections, classifies them by
//! greeting, and pairs them FIFO through the [`PairingEngine`].

pub mod connection;
pub mod intake;
pub mod pairing;

pub use connection::{Connection, Role};
pub use intake::IntakeQueue;
pub use pairing::{PairingEngine, Session};

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::MasterConfig;
use crate::error::Result;
use crate::net::{Endpoint, LineEvent, LineStream, Listener};
use crate::protocol::Greeting;

pub struct MasterNode {
    config: MasterConfig,
    engine: Arc<PairingEngine>,
    endpoint: Endpoint,
    shutdown: CancellationToken,
}

impl MasterNode {
    pub fn new(config: MasterConfig, shutdown: CancellationToken) -> Self {
        let engine = Arc::new(PairingEngine::new(config.pair_poll(), shutdown.clone()));
        let endpoint = Endpoint::new(config.max_line_bytes);
        Self {
            config,
            engine,
            endpoint,
            shutdown,
        }
    }

    pub fn engine(&self) -> Arc<PairingEngine> {
        self.engine.clone()
    }

    /// Bind the listen socket. Bind failure is fatal at master init.
    pub async fn bind(self) -> Result<BoundMaster> {
        let listener = self
            .endpoint
            .bind(&self.config.listen_addr.to_string())
            .await?;
        let local = listener.local_addr()?;
        tracing::info!(addr = %local, "master listening");
        Ok(BoundMaster {
            config: self.config,
            engine: self.engine,
            listener,
            shutdown: self.shutdown,
        })
    }

    /// Bind, start the pairing loop, and accept until stopped.
    pub async fn run(self) -> Result<()> {
        self.bind().await?.serve().await
    }
}

pub struct BoundMaster {
    config: MasterConfig,
    engine: Arc<PairingEngine>,
    listener: Listener,
    shutdown: CancellationToken,
}

impl BoundMaster {
    pub fn local_addr(&self) -> Result<std::net::SocketAddr> {
        self.listener.local_addr()
    }

    pub fn engine(&self) -> Arc<PairingEngine> {
        self.engine.clone()
    }

    pub async fn serve(self) -> Result<()> {
        tokio::spawn(self.engine.clone().run());

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        tracing::debug!(peer = %peer, "accepted");
                        let engine = self.engine.clone();
                        let shutdown = self.shutdown.clone();
                        let greeting_wait = self.config.connect_timeout();
                        tokio::spawn(async move {
                            handle_connection(engine, stream, greeting_wait, shutdown).await;
                        });
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "accept failed");
                    }
                }
            }
        }

        tracing::info!("master stopped");
        Ok(())
    }
}

/// Read the greeting, register the connection with the engine, then watch
/// the socket until `BYE`, EOF, or shutdown.
async fn handle_connection(
    engine: Arc<PairingEngine>,
    mut stream: LineStream,
    greeting_wait: std::time::Duration,
    shutdown: CancellationToken,
) {
    let peer = stream.peer_addr();
    let greeting = match stream.next_line(greeting_wait).await {
        Ok(LineEvent::Line(line)) => match Greeting::parse(&line) {
            Ok(g) => g,
            Err(e) => {
                tracing::warn!(peer = %peer, error = %e, "bad greeting");
                return;
            }
        },
        Ok(LineEvent::Eof) | Ok(LineEvent::TimedOut) => return,
        Err(e) => {
            tracing::warn!(peer = %peer, error = %e, "greeting read failed");
            return;
        }
    };

    let (role, listen_port) = match greeting {
        // REQUEST_CLIENT comes from a worker offering to serve.
        Greeting::RequestClient { listen_port } => (Role::Worker, listen_port),
        Greeting::RequestWorker { listen_port } => (Role::Client, listen_port),
        Greeting::Bye => return,
    };

    let (mut reader, writer) = stream.into_split();
    let conn = Arc::new(Connection::new(peer, listen_port, role, writer));
    match role {
        Role::Client => engine.on_client_connect(conn.clone()),
        Role::Worker => engine.on_worker_connect(conn.clone()),
    }

    let closer = conn.closer();
    loop {
        tokio::select! {
            _ = closer.cancelled() => break,
            _ = shutdown.cancelled() => break,
            read = reader.read_line() => match read {
                Ok(Some(line)) => {
                    if line.trim() == "BYE" {
                        break;
                    }
                    // Late lines stay retrievable by the engine.
                    reader.stash(line);
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::debug!(peer = %peer, error = %e, "read failed");
                    break;
                }
            }
        }
    }

    engine.on_disconnect(&conn);
    tracing::debug!(peer = %peer, role = %role, "connection closed");
}
