//! Test harness for master/worker integration tests.
//!
//! Spawns a real master on an ephemeral port and provides scripted peers
//! speaking the line protocol over real sockets.

// Each test crate pulls this in with `mod test_harness;` and uses a subset.
#![allow(dead_code)]

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use broker_lite::config::{MasterConfig, MAX_LINE_BYTES};
use broker_lite::master::{MasterNode, PairingEngine};
use broker_lite::net::{Endpoint, LineEvent, LineStream};

/// Master configuration with short timeouts for faster tests.
pub fn test_master_config() -> MasterConfig {
    MasterConfig {
        listen_addr: "127.0.0.1:0".parse().unwrap(),
        pair_poll_ms: 20,
        connect_timeout_ms: 1000,
        max_line_bytes: MAX_LINE_BYTES,
    }
}

/// Handle to a running test master.
pub struct TestMaster {
    pub addr: SocketAddr,
    pub engine: Arc<PairingEngine>,
    pub shutdown: CancellationToken,
    serve_handle: JoinHandle<()>,
}

impl TestMaster {
    pub async fn start() -> Self {
        let shutdown = CancellationToken::new();
        let node = MasterNode::new(test_master_config(), shutdown.clone());
        let bound = node.bind().await.expect("bind test master");
        let addr = bound.local_addr().expect("local addr");
        let engine = bound.engine();
        let serve_handle = tokio::spawn(async move {
            let _ = bound.serve().await;
        });
        Self {
            addr,
            engine,
            shutdown,
            serve_handle,
        }
    }

    pub fn stop(&self) {
        self.shutdown.cancel();
    }
}

impl Drop for TestMaster {
    fn drop(&mut self) {
        self.serve_handle.abort();
    }
}

/// Dial the master and send a greeting line.
pub async fn connect_peer(addr: SocketAddr, greeting: &str) -> LineStream {
    let endpoint = Endpoint::new(MAX_LINE_BYTES);
    let mut stream = endpoint
        .dial(&addr.to_string(), Duration::from_secs(1))
        .await
        .expect("dial master");
    stream.write_line(greeting).await.expect("send greeting");
    stream
}

/// Read one line or panic with context.
pub async fn expect_line(stream: &mut LineStream, wait: Duration) -> String {
    match stream.next_line(wait).await.expect("read line") {
        LineEvent::Line(line) => line,
        other => panic!("expected a line, got {other:?}"),
    }
}

/// Assert no line arrives within `wait`.
pub async fn expect_silence(stream: &mut LineStream, wait: Duration) {
    match stream.next_line(wait).await.expect("read line") {
        LineEvent::TimedOut => {}
        other => panic!("expected silence, got {other:?}"),
    }
}

/// Wait for a condition to become true with timeout.
pub async fn wait_for<F, Fut>(
    condition: F,
    timeout_duration: Duration,
    poll_interval: Duration,
) -> bool
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    let start = tokio::time::Instant::now();
    while start.elapsed() < timeout_duration {
        if condition().await {
            return true;
        }
        tokio::time::sleep(poll_interval).await;
    }
    false
}

/// Assert a condition eventually becomes true.
pub async fn assert_eventually<F, Fut>(condition: F, timeout_duration: Duration, message: &str)
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    let result = wait_for(condition, timeout_duration, Duration::from_millis(10)).await;
    assert!(result, "{}", message);
}
