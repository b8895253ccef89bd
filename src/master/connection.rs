use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::Result;
use crate::net::LineWriter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Worker,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Client => write!(f, "client"),
            Role::Worker => write!(f, "worker"),
        }
    }
}

/// One accepted peer of the master.
///
/// Holds the write half; the read half lives in the per-connection task.
/// Pairing state is a non-owning session id — the session map is the only
/// owner of the pair itself.
pub struct Connection {
    id: String,
    advertised: SocketAddr,
    role: Role,
    writer: tokio::sync::Mutex<LineWriter>,
    closed: AtomicBool,
    closer: CancellationToken,
    session: Mutex<Option<Uuid>>,
}

impl Connection {
    /// `listen_port` is the dialable port the peer announced in its
    /// greeting; absent, the source port of the connection stands in.
    pub fn new(peer: SocketAddr, listen_port: Option<u16>, role: Role, writer: LineWriter) -> Self {
        let mut advertised = peer;
        if let Some(port) = listen_port {
            advertised.set_port(port);
        }
        Self {
            id: peer.to_string(),
            advertised,
            role,
            writer: tokio::sync::Mutex::new(writer),
            closed: AtomicBool::new(false),
            closer: CancellationToken::new(),
            session: Mutex::new(None),
        }
    }

    /// Stable host identifier; connection equality is identifier equality.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// The address a pair partner should dial.
    pub fn advertised(&self) -> SocketAddr {
        self.advertised
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn mark_closed(&self) {
        self.closed.store(true, Ordering::Release);
        self.closer.cancel();
    }

    /// Token the read task watches so master-initiated drops unblock it.
    pub fn closer(&self) -> CancellationToken {
        self.closer.clone()
    }

    pub fn session(&self) -> Option<Uuid> {
        *self.session.lock().unwrap()
    }

    pub fn set_session(&self, id: Uuid) {
        *self.session.lock().unwrap() = Some(id);
    }

    pub fn clear_session(&self) {
        *self.session.lock().unwrap() = None;
    }

    pub async fn send(&self, line: &str) -> Result<()> {
        self.writer.lock().await.write_line(line).await
    }

    /// Drop our half of the socket and wake the read task.
    pub async fn close(&self) {
        self.mark_closed();
        let _ = self.writer.lock().await.shutdown().await;
    }
}

impl PartialEq for Connection {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Connection {}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("role", &self.role)
            .field("advertised", &self.advertised)
            .field("closed", &self.is_closed())
            .finish()
    }
}
