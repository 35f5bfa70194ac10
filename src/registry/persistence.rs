//! Serialized persistence worker.
//!
//! Every save request goes through one task that owns the queue. Requests
//! that pile up while a save is running are answered by the next single
//! save, which snapshots the registry after all of them were queued.
//! Shutdown sends a drain command behind any queued requests and waits for
//! the worker to exit.

use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::observability::metrics;
use crate::registry::error::PersistenceError;
use crate::registry::store::ClientRegistry;

/// Result delivered to callers waiting on a save.
pub type SaveOutcome = Result<(), Arc<PersistenceError>>;

enum Command {
    Save(Option<oneshot::Sender<SaveOutcome>>),
    Drain(oneshot::Sender<()>),
}

/// Handle used to submit save requests to the worker.
#[derive(Debug)]
pub struct PersistenceHandle {
    tx: mpsc::Sender<Command>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Command::Save(reply) => write!(f, "Save(observed: {})", reply.is_some()),
            Command::Drain(_) => write!(f, "Drain"),
        }
    }
}

impl PersistenceHandle {
    /// Spawn the worker for `registry` with a queue of `capacity` requests.
    pub fn spawn(registry: Arc<ClientRegistry>, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let worker = tokio::spawn(PersistenceWorker { registry, rx }.run());
        Self {
            tx,
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Queue a save and wait for its outcome.
    pub async fn save(&self) -> SaveOutcome {
        let rx = self.save_observed().await?;
        rx.await.map_err(|_| Arc::new(PersistenceError::Closed))?
    }

    /// Queue a save and return a receiver for its outcome without waiting.
    pub async fn save_observed(&self) -> Result<oneshot::Receiver<SaveOutcome>, Arc<PersistenceError>> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Save(Some(reply)))
            .await
            .map_err(|_| Arc::new(PersistenceError::Closed))?;
        Ok(rx)
    }

    /// Queue a save without observing it.
    ///
    /// A full queue already holds a save that has not started, and that save
    /// will capture the current state, so the request is dropped.
    pub fn request_save(&self) {
        match self.tx.try_send(Command::Save(None)) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::debug!("Save queue full, relying on pending save");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::warn!("Persistence worker stopped, save request dropped");
            }
        }
    }

    /// Process every queued request, then stop the worker.
    ///
    /// Requests submitted afterwards fail with [`PersistenceError::Closed`].
    pub async fn shutdown(&self) {
        let (done, rx) = oneshot::channel();
        if self.tx.send(Command::Drain(done)).await.is_ok() {
            let _ = rx.await;
        }

        let worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                tracing::error!(error = %e, "Persistence worker terminated abnormally");
            }
        }
        tracing::info!("Persistence worker drained");
    }
}

struct PersistenceWorker {
    registry: Arc<ClientRegistry>,
    rx: mpsc::Receiver<Command>,
}

impl PersistenceWorker {
    async fn run(mut self) {
        tracing::debug!(path = %self.registry.path().display(), "Persistence worker started");

        while let Some(first) = self.rx.recv().await {
            let mut requested = 0usize;
            let mut waiters = Vec::new();
            let mut drain = None;

            let mut next = Some(first);
            while let Some(command) = next.take() {
                match command {
                    Command::Save(reply) => {
                        requested += 1;
                        waiters.extend(reply);
                    }
                    Command::Drain(done) => {
                        drain = Some(done);
                        break;
                    }
                }
                next = self.rx.try_recv().ok();
            }

            if requested > 0 {
                let outcome = self.save(requested).await;
                for waiter in waiters {
                    let _ = waiter.send(outcome.clone());
                }
            }

            if let Some(done) = drain {
                self.rx.close();
                let _ = done.send(());
                break;
            }
        }

        tracing::debug!("Persistence worker stopped");
    }

    async fn save(&self, requested: usize) -> SaveOutcome {
        match self.registry.save().await {
            Ok(()) => {
                metrics::record_save("ok");
                tracing::debug!(
                    path = %self.registry.path().display(),
                    coalesced = requested,
                    "Registry saved"
                );
                Ok(())
            }
            Err(e) => {
                metrics::record_save("error");
                tracing::error!(
                    path = %self.registry.path().display(),
                    error = %e,
                    "Failed to save registry"
                );
                Err(Arc::new(e))
            }
        }
    }
}
