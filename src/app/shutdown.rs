use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Returns a token that fires on SIGINT or SIGTERM. The signal listener
/// runs for the process lifetime.
pub fn shutdown_token() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        match wait_for_signal().await {
            Ok(()) => info!("Shutdown signal received"),
            Err(e) => error!(error = %e, "Signal listener failed, shutting down"),
        }
        trigger.cancel();
    });
    token
}

#[cfg(unix)]
async fn wait_for_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};
    let mut term = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result,
        _ = term.recv() => Ok(()),
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}
