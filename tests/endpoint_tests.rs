//! Line framing and message-queue behavior over real sockets.

use std::time::Duration;

use broker_lite::net::{Endpoint, LineEvent, LineStream};
use broker_lite::BrokerError;

const WAIT: Duration = Duration::from_secs(2);

async fn socket_pair(endpoint: &Endpoint) -> (LineStream, LineStream) {
    let listener = endpoint.bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let addr_str = addr.to_string();
    let (accepted, dialed) = tokio::join!(
        listener.accept(),
        endpoint.dial(&addr_str, Duration::from_secs(1)),
    );
    let (server_side, _) = accepted.unwrap();
    (server_side, dialed.unwrap())
}

#[tokio::test]
async fn lines_round_trip_in_order() {
    let endpoint = Endpoint::new(1024);
    let (mut server, mut client) = socket_pair(&endpoint).await;

    client.write_line("first").await.unwrap();
    client.write_line("second line").await.unwrap();

    assert_eq!(server.read_line().await.unwrap(), Some("first".to_string()));
    assert_eq!(
        server.read_line().await.unwrap(),
        Some("second line".to_string())
    );

    drop(client);
    assert_eq!(server.read_line().await.unwrap(), None);
}

#[tokio::test]
async fn oversize_line_fails_the_read() {
    let endpoint = Endpoint::new(32);
    let (mut server, mut client) = socket_pair(&endpoint).await;

    let long = "x".repeat(100);
    client.write_line(&long).await.unwrap();

    match server.read_line().await {
        Err(BrokerError::OversizeLine { max: 32 }) => {}
        other => panic!("expected oversize error, got {other:?}"),
    }
}

#[tokio::test]
async fn bounded_read_times_out_quietly() {
    let endpoint = Endpoint::new(1024);
    let (mut server, _client) = socket_pair(&endpoint).await;

    assert_eq!(
        server.next_line(Duration::from_millis(50)).await.unwrap(),
        LineEvent::TimedOut
    );
}

#[tokio::test]
async fn stashed_lines_are_retrievable_by_origin() {
    let endpoint = Endpoint::new(1024);
    let (mut server, mut client) = socket_pair(&endpoint).await;
    let origin = server.peer_addr();

    client.write_line("kept for later").await.unwrap();
    let line = server.read_line().await.unwrap().unwrap();
    server.stash(line);

    assert_eq!(endpoint.queue_depth(), 1);
    let msg = endpoint
        .pop_where(|m| m.origin == origin)
        .expect("stashed by origin");
    assert_eq!(msg.line, "kept for later");
    assert_eq!(endpoint.queue_depth(), 0);
    assert!(endpoint.pop_latest().is_none());
}

#[tokio::test]
async fn tagged_write_marks_the_next_stashed_line() {
    let endpoint = Endpoint::new(1024);
    let (mut server, mut client) = socket_pair(&endpoint).await;

    client
        .write_line_tagged("PING", "expect-pong")
        .await
        .unwrap();
    let ping = server.read_line().await.unwrap().unwrap();
    assert_eq!(ping, "PING");
    server.write_line("PONG").await.unwrap();

    let pong = client.read_line().await.unwrap().unwrap();
    client.stash(pong);

    let msg = endpoint.pop_latest().expect("stashed reply");
    assert_eq!(msg.line, "PONG");
    assert_eq!(msg.tag.as_deref(), Some("expect-pong"));
}

#[tokio::test]
async fn pop_latest_returns_most_recent_unconsumed() {
    let endpoint = Endpoint::new(1024);
    let (mut server, mut client) = socket_pair(&endpoint).await;

    for text in ["one", "two", "three"] {
        client.write_line(text).await.unwrap();
        let line = server.read_line().await.unwrap().unwrap();
        server.stash(line);
    }

    assert_eq!(endpoint.queue_depth(), 3);
    assert_eq!(endpoint.pop_latest().unwrap().line, "three");
    assert_eq!(endpoint.pop_latest().unwrap().line, "two");
    assert_eq!(endpoint.queue_depth(), 1);
}

#[tokio::test]
async fn dial_refused_is_a_socket_error() {
    let endpoint = Endpoint::new(1024);
    let result = endpoint.dial("127.0.0.1:1", WAIT).await;
    assert!(matches!(result, Err(BrokerError::Socket(_))));
}

#[tokio::test]
async fn dial_unresolvable_is_a_resolve_error() {
    let endpoint = Endpoint::new(1024);
    let result = endpoint
        .dial("definitely-not-a-host.invalid:3224", WAIT)
        .await;
    assert!(matches!(result, Err(BrokerError::Resolve(_))));
}
