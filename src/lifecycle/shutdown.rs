//! Shutdown coordination.

use std::future::Future;

use tokio::sync::broadcast;

/// Coordinator for graceful shutdown.
///
/// Provides a broadcast channel that the server and its background tasks
/// (such as the rate-limit evictor) subscribe to.
#[derive(Debug, Clone)]
pub struct Shutdown {
    tx: broadcast::Sender<()>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }

    /// Trigger the shutdown signal.
    pub fn trigger(&self) {
        // No subscribers left means nothing is running.
        let _ = self.tx.send(());
    }

    /// Number of tasks still listening.
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Resolve on Ctrl+C or when [`trigger`](Self::trigger) is called,
    /// whichever comes first.
    ///
    /// Subscribes immediately, so a trigger issued before the future is
    /// first polled is not missed.
    pub fn signalled(&self) -> impl Future<Output = ()> + Send + 'static {
        let mut rx = self.subscribe();
        let shutdown = self.clone();
        async move {
            let ctrl_c = async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    tracing::error!(error = %e, "Failed to listen for Ctrl+C");
                    // Only the internal trigger remains.
                    std::future::pending::<()>().await;
                }
            };

            tokio::select! {
                _ = ctrl_c => {
                    tracing::info!("Shutdown signal received");
                    shutdown.trigger();
                }
                _ = rx.recv() => {
                    tracing::info!("Shutdown triggered");
                }
            }
        }
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}
