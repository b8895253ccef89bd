//! Intake queue discipline: FIFO order and the permit/size invariant.

use std::sync::Arc;
use std::time::Duration;

use broker_lite::master::{Connection, IntakeQueue, Role};
use broker_lite::net::{Endpoint, LineReader, LineStream};

/// A connection backed by a real socket, with both ends kept alive.
struct TestConn {
    conn: Arc<Connection>,
    _reader: LineReader,
    _far_end: LineStream,
}

async fn test_conn(role: Role) -> TestConn {
    let endpoint = Endpoint::new(1024);
    let listener = endpoint.bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let addr_str = addr.to_string();
    let (accepted, dialed) = tokio::join!(
        listener.accept(),
        endpoint.dial(&addr_str, Duration::from_secs(1)),
    );
    let (stream, peer) = accepted.unwrap();
    let (reader, writer) = stream.into_split();
    TestConn {
        conn: Arc::new(Connection::new(peer, None, role, writer)),
        _reader: reader,
        _far_end: dialed.unwrap(),
    }
}

#[tokio::test]
async fn push_and_pop_are_fifo() {
    let queue = IntakeQueue::new();
    let a = test_conn(Role::Client).await;
    let b = test_conn(Role::Client).await;
    let c = test_conn(Role::Client).await;

    queue.push(a.conn.clone());
    queue.push(b.conn.clone());
    queue.push(c.conn.clone());

    assert_eq!(queue.try_pop().unwrap().id(), a.conn.id());
    assert_eq!(queue.try_pop().unwrap().id(), b.conn.id());
    assert_eq!(queue.try_pop().unwrap().id(), c.conn.id());
    assert!(queue.try_pop().is_none());
}

#[tokio::test]
async fn permits_track_queue_size() {
    let queue = IntakeQueue::new();
    assert_eq!(queue.available_permits(), 0);

    let a = test_conn(Role::Worker).await;
    let b = test_conn(Role::Worker).await;
    queue.push(a.conn.clone());
    queue.push(b.conn.clone());
    assert_eq!(queue.available_permits(), 2);
    assert_eq!(queue.len(), 2);

    let popped = queue.try_pop().unwrap();
    assert_eq!(queue.available_permits(), 1);
    assert_eq!(queue.len(), 1);

    queue.push_front(popped);
    assert_eq!(queue.available_permits(), 2);
    assert_eq!(queue.len(), 2);
}

#[tokio::test]
async fn remove_consumes_the_matching_permit() {
    let queue = IntakeQueue::new();
    let a = test_conn(Role::Client).await;
    let b = test_conn(Role::Client).await;
    queue.push(a.conn.clone());
    queue.push(b.conn.clone());

    let removed = queue.remove(a.conn.id()).expect("entry removed");
    assert_eq!(removed.id(), a.conn.id());
    assert_eq!(queue.len(), 1);
    assert_eq!(queue.available_permits(), 1);

    assert!(queue.remove("10.0.0.9:1").is_none());
    assert_eq!(queue.try_pop().unwrap().id(), b.conn.id());
}

#[tokio::test]
async fn push_front_restores_the_turn() {
    let queue = IntakeQueue::new();
    let a = test_conn(Role::Client).await;
    let b = test_conn(Role::Client).await;
    queue.push(a.conn.clone());
    queue.push(b.conn.clone());

    let first = queue.try_pop().unwrap();
    queue.push_front(first);
    assert_eq!(queue.try_pop().unwrap().id(), a.conn.id());
}

#[tokio::test]
async fn closed_connections_report_it() {
    let a = test_conn(Role::Client).await;
    assert!(!a.conn.is_closed());
    a.conn.mark_closed();
    assert!(a.conn.is_closed());
}
