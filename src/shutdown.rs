//! Process lifetime: OS signals and supervision of the long-running tasks.

use std::future::Future;

use tokio::signal;
use tokio::task::{JoinError, JoinHandle};
use tracing::{error, info};

/// What ended the process's wait.
#[derive(Debug)]
pub enum Stopped<D, S> {
    Signal,
    Dispatcher(Result<D, JoinError>),
    Server(Result<S, JoinError>),
}

// Graceful shutdown signal future
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut term_signal) => {
                term_signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received. Stopping dispatcher.");
}

/// Waits until `signal` fires or either task finishes, whichever is first.
/// A finished task's join result is handed back, so the handle must not be
/// awaited again.
pub async fn first_to_stop<F, D, S>(
    signal: F,
    dispatcher: &mut JoinHandle<D>,
    server: &mut JoinHandle<S>,
) -> Stopped<D, S>
where
    F: Future<Output = ()>,
{
    tokio::select! {
        _ = signal => Stopped::Signal,
        joined = dispatcher => Stopped::Dispatcher(joined),
        joined = server => Stopped::Server(joined),
    }
}
