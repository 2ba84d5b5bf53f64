//! # Cross-platform OS signal handling.
//!
//! ## Signals
//! **Unix:** `SIGINT`, `SIGTERM`, `SIGQUIT`.
//!
//! **Other platforms:** Ctrl-C via [`tokio::signal::ctrl_c`].

/// Waits for a termination signal.
///
/// Returns `Err` if signal registration fails.
#[cfg(unix)]
pub async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigquit = signal(SignalKind::quit())?;

    tokio::select! {
        _ = sigint.recv()  => {},
        _ = sigterm.recv() => {},
        _ = sigquit.recv() => {},
    }
    Ok(())
}

/// Waits for a termination signal.
#[cfg(not(unix))]
pub async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}

/// Completes when a shutdown is requested; never completes when `enabled` is false
/// or the handlers cannot be installed.
pub(crate) async fn requested(enabled: bool) {
    if enabled {
        match wait_for_shutdown_signal().await {
            Ok(()) => return,
            Err(err) => tracing::warn!(error = %err, "signal handlers unavailable; ignoring OS signals"),
        }
    }
    futures::future::pending::<()>().await
}
