//! The worker's connection lifecycle.
//!
//! Each cycle serves exactly one client: register with the master, wait
//! for a pair assignment, dial the client, serve its dialogue, drop it,
//! and go back for the next one. Per-state handlers return the next
//! state; the stop token is honored at every state boundary.

use tokio_util::sync::CancellationToken;

use crate::config::WorkerConfig;
use crate::db::DbHandle;
use crate::error::Result;
use crate::net::{Endpoint, LineEvent, LineStream};
use crate::protocol::MasterReply;
use crate::worker::dispatcher::{Dispatcher, Outcome};
use crate::worker::state::ConnectState;

pub struct WorkerNode {
    config: WorkerConfig,
    endpoint: Endpoint,
    dispatcher: Dispatcher,
    shutdown: CancellationToken,
    master: Option<LineStream>,
    client: Option<LineStream>,
    /// Client address remembered from the last `PAIR_INFO`.
    job: Option<(String, u16)>,
}

impl WorkerNode {
    pub fn new(config: WorkerConfig, db: DbHandle, shutdown: CancellationToken) -> Self {
        let endpoint = Endpoint::new(config.max_line_bytes);
        Self {
            config,
            endpoint,
            dispatcher: Dispatcher::new(db),
            shutdown,
            master: None,
            client: None,
            job: None,
        }
    }

    pub async fn run(mut self) -> Result<()> {
        let mut state = ConnectState::ConnectToMaster;
        tracing::info!(master = %self.config.master_addr, "worker started");

        while state != ConnectState::Stopped {
            tracing::debug!(state = %state, "entering state");
            let next = match state {
                ConnectState::ConnectToMaster => self.connect_to_master().await,
                ConnectState::WaitForJob => self.wait_for_job().await,
                ConnectState::ConnectToClient => self.connect_to_client().await,
                ConnectState::ProcessJob => self.process_job().await,
                ConnectState::DisconnectClient => self.disconnect_client(),
                ConnectState::Stopped => ConnectState::Stopped,
            };
            debug_assert!(state.allows(next), "illegal transition {state} -> {next}");
            state = if self.shutdown.is_cancelled() {
                ConnectState::Stopped
            } else {
                next
            };
        }

        // Terminal: release whatever is still open.
        self.master = None;
        self.client = None;
        tracing::info!("worker stopped");
        Ok(())
    }

    async fn connect_to_master(&mut self) -> ConnectState {
        self.master = None;
        match self
            .endpoint
            .dial(&self.config.master_addr, self.config.connect_timeout())
            .await
        {
            Ok(mut stream) => match stream.write_line("REQUEST_CLIENT").await {
                Ok(()) => {
                    tracing::debug!(master = %self.config.master_addr, "registered with master");
                    self.master = Some(stream);
                    ConnectState::WaitForJob
                }
                Err(e) => {
                    tracing::warn!(error = %e, "greeting write failed");
                    self.pause().await;
                    ConnectState::ConnectToMaster
                }
            },
            Err(e) => {
                tracing::debug!(error = %e, "master connect failed, retrying");
                self.pause().await;
                ConnectState::ConnectToMaster
            }
        }
    }

    async fn wait_for_job(&mut self) -> ConnectState {
        let Some(mut master) = self.master.take() else {
            return ConnectState::ConnectToMaster;
        };
        let wait = self.config.connect_timeout();
        loop {
            if self.shutdown.is_cancelled() {
                return ConnectState::Stopped;
            }
            match master.next_line(wait).await {
                Ok(LineEvent::Line(line)) => match MasterReply::parse(&line) {
                    Ok(MasterReply::PairInfo { host, port }) => {
                        tracing::info!(client = %format!("{host}:{port}"), "pair assigned");
                        self.job = Some((host, port));
                        // Master socket closes cleanly here; the pair talks direct.
                        return ConnectState::ConnectToClient;
                    }
                    Ok(MasterReply::PairAbort) => {
                        tracing::warn!("pairing aborted by master");
                        return ConnectState::ConnectToMaster;
                    }
                    Err(_) => {
                        // Not ours to act on; keep it for late readers.
                        master.stash(line);
                    }
                },
                Ok(LineEvent::TimedOut) => continue,
                Ok(LineEvent::Eof) => {
                    tracing::debug!("master closed while waiting");
                    return ConnectState::ConnectToMaster;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "read from master failed");
                    return ConnectState::DisconnectClient;
                }
            }
        }
    }

    async fn connect_to_client(&mut self) -> ConnectState {
        let Some((host, port)) = self.job.take() else {
            return ConnectState::ConnectToMaster;
        };
        let addr = format!("{host}:{port}");
        match self
            .endpoint
            .dial(&addr, self.config.connect_timeout())
            .await
        {
            Ok(stream) => {
                tracing::info!(client = %addr, "serving client");
                self.client = Some(stream);
                ConnectState::ProcessJob
            }
            Err(e) => {
                // The client may already have moved on; abandoning this
                // pairing beats retrying a dead address.
                tracing::warn!(client = %addr, error = %e, "client dial failed");
                ConnectState::ConnectToMaster
            }
        }
    }

    async fn process_job(&mut self) -> ConnectState {
        let Some(mut client) = self.client.take() else {
            return ConnectState::DisconnectClient;
        };
        let wait = self.config.connect_timeout();
        loop {
            if self.shutdown.is_cancelled() {
                return ConnectState::Stopped;
            }
            match client.next_line(wait).await {
                Ok(LineEvent::Line(line)) => match self.dispatcher.handle(&line).await {
                    Outcome::Reply(reply) => {
                        if let Err(e) = client.write_line(&reply).await {
                            tracing::warn!(error = %e, "response write failed");
                            return ConnectState::DisconnectClient;
                        }
                    }
                    Outcome::Close => {
                        tracing::debug!("client said goodbye");
                        return ConnectState::DisconnectClient;
                    }
                },
                Ok(LineEvent::TimedOut) => continue,
                Ok(LineEvent::Eof) => return ConnectState::DisconnectClient,
                Err(e) => {
                    tracing::warn!(error = %e, "read from client failed");
                    return ConnectState::DisconnectClient;
                }
            }
        }
    }

    fn disconnect_client(&mut self) -> ConnectState {
        self.client = None;
        // Drop the master socket too if one is still held.
        self.master = None;
        ConnectState::ConnectToMaster
    }

    async fn pause(&self) {
        tokio::select! {
            _ = tokio::time::sleep(self.config.sleep_time()) => {}
            _ = self.shutdown.cancelled() => {}
        }
    }
}
