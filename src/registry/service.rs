//! Registry operations as seen by the admin surface.
//!
//! Each mutation is applied to the in-memory registry first and then handed
//! to the persistence worker:
//! - create waits for the save and reports its failure
//! - delete returns at once; an observer waits a bounded grace period
//! - toggle does not observe the save at all

use std::sync::Arc;
use std::time::Duration;

use tokio::time;

use crate::registry::error::RegistryError;
use crate::registry::persistence::PersistenceHandle;
use crate::registry::record::{ClientRecord, NewClient};
use crate::registry::store::{ClientRegistry, Resolution};

/// Default time a delete waits on its save before giving up observing it.
pub const DEFAULT_DELETE_GRACE: Duration = Duration::from_secs(15);

/// Client registry plus its persistence worker.
#[derive(Debug)]
pub struct RegistryService {
    registry: Arc<ClientRegistry>,
    persistence: PersistenceHandle,
    delete_grace: Duration,
}

impl RegistryService {
    /// Wrap a loaded registry and start its persistence worker.
    pub fn start(registry: Arc<ClientRegistry>, queue_capacity: usize, delete_grace: Duration) -> Self {
        let persistence = PersistenceHandle::spawn(registry.clone(), queue_capacity);
        Self {
            registry,
            persistence,
            delete_grace,
        }
    }

    pub fn registry(&self) -> &Arc<ClientRegistry> {
        &self.registry
    }

    pub fn list(&self) -> Vec<ClientRecord> {
        self.registry.list()
    }

    pub fn exists(&self, id: u64) -> bool {
        self.registry.exists(id)
    }

    pub fn resolve(&self, ip: &str) -> Resolution {
        self.registry.resolve(ip)
    }

    /// Register a client for `source_ip` and persist it.
    ///
    /// If the save fails the client stays registered in memory and
    /// [`RegistryError::Persistence`] is returned.
    pub async fn create(&self, request: NewClient, source_ip: &str) -> Result<ClientRecord, RegistryError> {
        let record = self.registry.create(&request, source_ip)?;

        if let Err(e) = self.persistence.save().await {
            tracing::error!(
                id = record.id,
                error = %e,
                "Client registered in memory but not persisted"
            );
            return Err(RegistryError::Persistence(e));
        }
        Ok(record)
    }

    /// Remove a client. The save outcome is observed for at most the grace
    /// period; the save itself is never cancelled.
    pub async fn delete(&self, id: u64) -> Result<(), RegistryError> {
        self.registry.delete(id)?;

        let outcome = match self.persistence.save_observed().await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(id, error = %e, "Could not queue save after delete");
                return Ok(());
            }
        };

        let grace = self.delete_grace;
        tokio::spawn(async move {
            match time::timeout(grace, outcome).await {
                Ok(Ok(Ok(()))) => tracing::debug!(id, "Delete persisted"),
                Ok(Ok(Err(e))) => tracing::error!(id, error = %e, "Delete not persisted"),
                Ok(Err(_)) => tracing::warn!(id, "Persistence worker dropped delete save"),
                Err(_) => tracing::warn!(
                    id,
                    grace_secs = grace.as_secs(),
                    "Save after delete still running, no longer waiting"
                ),
            }
        });
        Ok(())
    }

    /// Flip a client's enabled flag. The save is fire-and-forget.
    pub fn toggle(&self, id: u64) -> Result<bool, RegistryError> {
        let enabled = self.registry.toggle(id)?;
        self.persistence.request_save();
        Ok(enabled)
    }

    /// Drain pending saves and stop the worker.
    pub async fn shutdown(&self) {
        self.persistence.shutdown().await;
    }
}
