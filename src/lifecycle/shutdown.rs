//! Shutdown coordination for the control plane.

use tokio::sync::broadcast;

/// Coordinator for graceful shutdown.
///
/// The HTTP server and the health monitor each hold a receiver; a single
/// trigger stops both.
#[derive(Debug, Clone)]
pub struct Shutdown {
    tx: broadcast::Sender<()>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1);
        Self { tx }
    }

    /// Subscribe to the shutdown signal.
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }

    /// Trigger the shutdown signal. Safe to call more than once.
    pub fn trigger(&self) {
        let _ = self.tx.send(());
    }

    /// Number of tasks still subscribed.
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_trigger_reaches_every_subscriber() {
        let shutdown = Shutdown::new();
        let mut a = shutdown.subscribe();
        let mut b = shutdown.subscribe();
        assert_eq!(shutdown.receiver_count(), 2);

        shutdown.trigger();
        assert!(a.recv().await.is_ok());
        assert!(b.recv().await.is_ok());
    }
}
