use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::master::connection::{Connection, Role};
use crate::master::intake::IntakeQueue;
use crate::protocol::MasterReply;

/// A paired (client, worker) tuple. Lives in the engine's session map
/// from the moment of a match until either socket drops.
pub struct Session {
    pub id: Uuid,
    pub client: Arc<Connection>,
    pub worker: Arc<Connection>,
}

/// The master's matching engine: two intake queues and the loop that
/// drains them pairwise, strict FIFO on each side.
pub struct PairingEngine {
    clients: IntakeQueue,
    workers: IntakeQueue,
    sessions: Mutex<HashMap<Uuid, Session>>,
    poll: Duration,
    shutdown: CancellationToken,
}

impl PairingEngine {
    pub fn new(poll: Duration, shutdown: CancellationToken) -> Self {
        Self {
            clients: IntakeQueue::new(),
            workers: IntakeQueue::new(),
            sessions: Mutex::new(HashMap::new()),
            poll,
            shutdown,
        }
    }

    pub fn on_client_connect(&self, conn: Arc<Connection>) {
        tracing::debug!(peer = conn.id(), "client queued");
        self.clients.push(conn);
    }

    pub fn on_worker_connect(&self, conn: Arc<Connection>) {
        tracing::debug!(peer = conn.id(), "worker queued");
        self.workers.push(conn);
    }

    /// Tear down whatever the dropped connection still holds: its queue
    /// slot if unpaired, its session if paired. The peer's own
    /// socket-closure handler is the sole arbiter of freeing the peer.
    pub fn on_disconnect(&self, conn: &Connection) {
        conn.mark_closed();

        let removed = match conn.role() {
            Role::Client => self.clients.remove(conn.id()),
            Role::Worker => self.workers.remove(conn.id()),
        };
        if removed.is_some() {
            tracing::debug!(peer = conn.id(), role = %conn.role(), "dropped from intake queue");
        }

        if let Some(sid) = conn.session() {
            let session = self.sessions.lock().unwrap().remove(&sid);
            if let Some(session) = session {
                let peer = match conn.role() {
                    Role::Client => &session.worker,
                    Role::Worker => &session.client,
                };
                peer.clear_session();
                tracing::info!(session = %sid, peer = conn.id(), "session torn down");
            }
        }
    }

    pub fn client_queue(&self) -> &IntakeQueue {
        &self.clients
    }

    pub fn worker_queue(&self) -> &IntakeQueue {
        &self.workers
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    /// The matching loop. Blocks only on the queue semaphores and the
    /// inter-poll sleep; exits only on the stop token.
    pub async fn run(self: Arc<Self>) {
        tracing::info!("pairing engine started");
        loop {
            if self.shutdown.is_cancelled() {
                break;
            }
            if self.clients.is_empty() || self.workers.is_empty() {
                tokio::select! {
                    _ = tokio::time::sleep(self.poll) => {}
                    _ = self.shutdown.cancelled() => break,
                }
                continue;
            }

            let Some(client) = self.next_live(&self.clients) else {
                continue;
            };
            let Some(worker) = self.next_live(&self.workers) else {
                // No live worker after all; the client keeps its turn.
                self.clients.push_front(client);
                continue;
            };

            self.establish(client, worker).await;
        }
        tracing::info!("pairing engine stopped");
    }

    /// Dequeue until a live entry turns up. Entries whose socket closed
    /// between enqueue and dequeue are dropped silently; the retry stays
    /// on this side and never consumes a slot from the other queue.
    fn next_live(&self, queue: &IntakeQueue) -> Option<Arc<Connection>> {
        loop {
            let conn = queue.try_pop()?;
            if conn.is_closed() {
                tracing::debug!(peer = conn.id(), "skipping dead queue entry");
                continue;
            }
            return Some(conn);
        }
    }

    /// Install the session and tell both sides about each other.
    async fn establish(&self, client: Arc<Connection>, worker: Arc<Connection>) {
        let sid = Uuid::new_v4();
        client.set_session(sid);
        worker.set_session(sid);
        self.sessions.lock().unwrap().insert(
            sid,
            Session {
                id: sid,
                client: client.clone(),
                worker: worker.clone(),
            },
        );

        // The worker dials the client, so it is informed first.
        let to_worker = MasterReply::PairInfo {
            host: client.advertised().ip().to_string(),
            port: client.advertised().port(),
        };
        if let Err(e) = worker.send(&to_worker.encode()).await {
            tracing::warn!(worker = worker.id(), error = %e, "pair info write failed; worker dropped");
            self.sessions.lock().unwrap().remove(&sid);
            client.clear_session();
            worker.close().await;
            // Nobody was told anything yet; the client keeps its turn.
            self.clients.push_front(client);
            return;
        }

        let to_client = MasterReply::PairInfo {
            host: worker.advertised().ip().to_string(),
            port: worker.advertised().port(),
        };
        if let Err(e) = client.send(&to_client.encode()).await {
            tracing::warn!(client = client.id(), error = %e, "pair info write failed; aborting pair");
            let _ = worker.send(&MasterReply::PairAbort.encode()).await;
            self.sessions.lock().unwrap().remove(&sid);
            client.close().await;
            worker.close().await;
            return;
        }

        tracing::info!(
            session = %sid,
            client = client.id(),
            worker = worker.id(),
            "paired"
        );
    }
}
