use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use tokio::sync::Semaphore;

use crate::master::connection::Connection;

/// FIFO of unpaired connections of one role.
///
/// One long-lived mutex guards the entries; a counting semaphore tracks
/// availability. Invariant: the permit count equals the queue size at
/// every quiescent point, and nothing dequeues without first taking a
/// permit.
pub struct IntakeQueue {
    entries: Mutex<VecDeque<Arc<Connection>>>,
    available: Semaphore,
}

impl Default for IntakeQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl IntakeQueue {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            available: Semaphore::new(0),
        }
    }

    pub fn push(&self, conn: Arc<Connection>) {
        let mut entries = self.entries.lock().unwrap();
        entries.push_back(conn);
        self.available.add_permits(1);
    }

    /// Return a connection to the head of the queue, preserving its turn.
    pub fn push_front(&self, conn: Arc<Connection>) {
        let mut entries = self.entries.lock().unwrap();
        entries.push_front(conn);
        self.available.add_permits(1);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Permit first, then dequeue. `None` when no permit is available.
    pub fn try_pop(&self) -> Option<Arc<Connection>> {
        let permit = self.available.try_acquire().ok()?;
        permit.forget();
        self.entries.lock().unwrap().pop_front()
    }

    /// Remove a specific entry by host identifier, consuming its permit.
    pub fn remove(&self, id: &str) -> Option<Arc<Connection>> {
        let mut entries = self.entries.lock().unwrap();
        let pos = entries.iter().position(|c| c.id() == id)?;
        let conn = entries.remove(pos);
        if let Ok(permit) = self.available.try_acquire() {
            permit.forget();
        }
        conn
    }

    /// Exposed so tests can assert the permit/size invariant.
    pub fn available_permits(&self) -> usize {
        self.available.available_permits()
    }
}
