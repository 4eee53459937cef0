//! Stop signal shared by the listeners.
//!
//! `HttpServer::run` hands each listener its own receiver. A trigger, from
//! Ctrl+C or from a listener that failed, starts the drain on all of them.

use tokio::sync::broadcast;

/// Broadcast stop signal; clones share the same channel.
#[derive(Debug, Clone)]
pub struct Shutdown {
    tx: broadcast::Sender<()>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1);
        Self { tx }
    }

    /// One receiver per listener.
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }

    /// Start the drain on every listener.
    pub fn trigger(&self) {
        let _ = self.tx.send(());
    }

    /// Listeners still holding a receiver.
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// Wait for Ctrl+C, then trigger `shutdown`.
pub async fn trigger_on_ctrl_c(shutdown: Shutdown) {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Shutdown signal received"),
        Err(e) => tracing::error!(error = %e, "Failed to listen for Ctrl+C, shutting down"),
    }
    shutdown.trigger();
}
