//! Graceful shutdown coordination (spec §6).
//!
//! Background tasks (cache refresh, pool reaper, rate-limiter cleanup,
//! template sweeper) are each driven by a `watch::Sender<bool>`; signalling
//! `true` tells the loop to stop after its current tick. `run` waits for
//! Ctrl-C or SIGTERM, stops the background tasks, then returns so the
//! caller can drain the Axum server and close the pool.

use tokio::signal;
use tokio::sync::watch;

/// Spawn a background loop under light supervision: if `make_loop`'s
/// future panics, the panic is logged and the loop is started once more
/// rather than silently vanishing. A second panic is left to take down
/// the task (and surface in the logs) rather than spinning forever.
pub fn spawn_supervised<F, Fut>(name: &'static str, make_loop: F)
where
    F: Fn() -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        if let Err(err) = tokio::spawn(make_loop()).await {
            if err.is_panic() {
                tracing::error!(task = name, "background task panicked, restarting once");
                let _ = tokio::spawn(make_loop()).await;
            }
        }
    });
}

/// Handles to every background task's stop signal, grouped so `main` has
/// one place to shut them all down from.
#[derive(Default)]
pub struct Handles {
    senders: Vec<watch::Sender<bool>>,
}

impl Handles {
    pub fn push(&mut self, sender: watch::Sender<bool>) {
        self.senders.push(sender);
    }

    /// Signal every registered background task to stop.
    pub fn stop_all(&self) {
        for sender in &self.senders {
            let _ = sender.send(true);
        }
    }
}

/// Resolves on Ctrl-C or SIGTERM, whichever comes first. Used as the
/// future passed to `axum::serve(...).with_graceful_shutdown(...)`.
pub async fn wait_for_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received ctrl-c, shutting down"),
        _ = terminate => tracing::info!("received sigterm, shutting down"),
    }
}
