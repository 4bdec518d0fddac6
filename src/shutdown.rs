use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;

/// Installs a SIGTERM/SIGINT listener and returns the token every
/// long-running loop watches. On cancellation workers finish or abandon
/// their in-flight job; anything abandoned is reclaimed by the watchdog.
pub fn install_shutdown_handler() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();

    tokio::spawn(async move {
        let sigterm = signal(SignalKind::terminate());
        let sigint = signal(SignalKind::interrupt());
        let (mut sigterm, mut sigint) = match (sigterm, sigint) {
            (Ok(t), Ok(i)) => (t, i),
            (Err(e), _) | (_, Err(e)) => {
                // Without signal handlers there is no graceful path left.
                tracing::error!(error = %e, "failed to install signal handlers, shutting down");
                trigger.cancel();
                return;
            }
        };

        tokio::select! {
            _ = sigterm.recv() => tracing::info!("received SIGTERM, initiating graceful shutdown"),
            _ = sigint.recv() => tracing::info!("received SIGINT, initiating graceful shutdown"),
        }
        trigger.cancel();
    });

    token
}
