//! Process shutdown signals.

use std::future::Future;
use std::io;

use tokio::signal;
use tracing::warn;

/// Resolve once the process is asked to stop, naming the signal.
///
/// Listens for Ctrl+C everywhere and SIGTERM on unix. Handlers are installed
/// before this returns, so a signal arriving before the first poll is not
/// lost.
pub fn shutdown_signal() -> io::Result<impl Future<Output = &'static str>> {
    #[cfg(unix)]
    let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())?;

    Ok(async move {
        let ctrl_c = async {
            match signal::ctrl_c().await {
                Ok(()) => "SIGINT",
                Err(e) => {
                    warn!(error = %e, "Failed to listen for Ctrl+C");
                    std::future::pending().await
                }
            }
        };

        #[cfg(unix)]
        let terminate = async move {
            terminate.recv().await;
            "SIGTERM"
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<&'static str>();

        tokio::select! {
            name = ctrl_c => name,
            name = terminate => name,
        }
    })
}
