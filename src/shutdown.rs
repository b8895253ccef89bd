use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;

/// Install the process-wide stop signal.
///
/// Returns a `CancellationToken` cancelled on SIGTERM or SIGINT. Both
/// sides of the brokerage latch on it: `PairingEngine::run` checks it at
/// every loop iteration and selects against its inter-poll sleep, and
/// `WorkerNode::run` checks it at every state boundary, so cancellation
/// drains within one poll interval plus one outstanding I/O timeout.
pub fn install_shutdown_handler() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();

    tokio::spawn(async move {
        let signal_name = stop_signal().await;
        tracing::info!(signal = signal_name, "stop requested, draining");
        trigger.cancel();
    });

    token
}

/// Wait for either termination signal; report which one fired.
async fn stop_signal() -> &'static str {
    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");

    tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    }
}
