//! Lifecycle Frame (§4.6): single-instance enforcement, signal handling,
//! and the idempotent shutdown entry point every termination path funnels
//! through.

use std::path::Path;

use courtstream_log::tracing;
use interprocess::local_socket::tokio::LocalSocketListener;
use tokio::sync::watch;

use crate::error::Fatal;

/// Holds the single-instance advisory lock for the lifetime of the
/// process. A bound [`LocalSocketListener`] is never accepted on; its only
/// purpose is that the bind itself fails if another instance already holds
/// the same name, and the OS releases it automatically if this process
/// dies without a clean shutdown.
#[derive(Debug)]
pub struct InstanceLock {
    _listener: LocalSocketListener,
}

impl InstanceLock {
    /// Attempts to acquire the single-instance lock at `lock_path`.
    ///
    /// # Errors
    ///
    /// Returns [`Fatal::AlreadyRunning`] if another instance already holds
    /// the lock.
    pub async fn acquire(lock_path: &Path) -> Result<Self, Fatal> {
        let name = lock_path.display().to_string();
        LocalSocketListener::bind(name)
            .await
            .map(|listener| Self {
                _listener: listener,
            })
            .map_err(|_| Fatal::AlreadyRunning)
    }
}

/// Installs `SIGINT`/`SIGTERM` handlers that flip `shutdown` to `true`.
///
/// Sending `true` to an already-`true` watch channel is a no-op for every
/// observer, which is what makes repeated signals (or a signal racing an
/// already-in-progress shutdown) safe.
///
/// # Panics
///
/// Panics if the process's signal handlers cannot be installed, which only
/// happens if they have already been claimed elsewhere.
pub fn install_signal_handlers(shutdown: watch::Sender<bool>) {
    let mut interrupt = tokio::signal::unix::signal(
        tokio::signal::unix::SignalKind::interrupt(),
    )
    .expect("failed to install SIGINT handler");
    let mut terminate = tokio::signal::unix::signal(
        tokio::signal::unix::SignalKind::terminate(),
    )
    .expect("failed to install SIGTERM handler");

    tokio::spawn(async move {
        tokio::select! {
            _ = interrupt.recv() => {
                tracing::info!("received SIGINT, shutting down");
            }
            _ = terminate.recv() => {
                tracing::info!("received SIGTERM, shutting down");
            }
        }
        let _ = shutdown.send(true);
    });
}
