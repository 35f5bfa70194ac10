//! In-memory client registry with atomic on-disk persistence.
//!
//! # Lock discipline
//! - `state` (`std::sync::RwLock`) guards records, the ip index and `next_id`.
//!   It is only held for map operations, never across an await or disk I/O.
//! - `file_lock` (`tokio::sync::Mutex`) serializes load and save so two saves
//!   never interleave on the same file.
//! - Order is always `file_lock` then `state`.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::runtime::Handle;
use tokio::sync::Mutex;

use crate::observability::metrics;
use crate::registry::codec;
use crate::registry::error::{PersistenceError, RegistryError};
use crate::registry::record::{client_key, ClientRecord, NewClient};

const TMP_SUFFIX: &str = ".tmp";

/// Index entry for a registered source address.
#[derive(Debug, Clone, PartialEq, Eq)]
struct IpEntry {
    id: u64,
    proxy_target: String,
}

#[derive(Debug)]
struct RegistryState {
    records: HashMap<String, ClientRecord>,
    ip_index: HashMap<String, IpEntry>,
    next_id: u64,
}

impl RegistryState {
    fn empty() -> Self {
        Self {
            records: HashMap::new(),
            ip_index: HashMap::new(),
            next_id: 1,
        }
    }

    fn from_records(records: Vec<ClientRecord>, next_id: u64) -> Self {
        let mut state = Self::empty();
        state.next_id = next_id.max(1);
        for record in records {
            state.ip_index.insert(
                record.ip.clone(),
                IpEntry {
                    id: record.id,
                    proxy_target: record.proxy_target.clone(),
                },
            );
            state.records.insert(record.key(), record);
        }
        state
    }
}

/// Outcome of looking up a source address for request routing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// The address is registered and enabled.
    Target(String),
    /// The address is registered but its client is disabled.
    Disabled,
    /// No client is registered for the address.
    Unknown,
}

/// Registry of client records backed by a YAML document.
#[derive(Debug)]
pub struct ClientRegistry {
    path: PathBuf,
    state: RwLock<RegistryState>,
    file_lock: Mutex<()>,
    tmp_seq: AtomicU64,
}

impl ClientRegistry {
    /// Create an empty registry persisted at `path`. Nothing is read until
    /// [`ClientRegistry::load`] is called.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            state: RwLock::new(RegistryState::empty()),
            file_lock: Mutex::new(()),
            tmp_seq: AtomicU64::new(0),
        }
    }

    /// Path of the primary document.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> RwLockReadGuard<'_, RegistryState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, RegistryState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Load the persisted document, replacing the in-memory state.
    ///
    /// Stale temporary files from an interrupted save are removed first.
    /// A missing document is a first run and yields an empty registry.
    pub async fn load(&self) -> Result<usize, PersistenceError> {
        let _file = self.file_lock.lock().await;

        let path = self.path.clone();
        let decoded = tokio::task::spawn_blocking(move || -> Result<_, PersistenceError> {
            let swept = sweep_stale_temp_files(&path)?;
            if swept > 0 {
                tracing::warn!(path = %path.display(), swept, "Removed stale temporary registry files");
            }

            match fs::read_to_string(&path) {
                Ok(text) => codec::decode(&text).map(Some),
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
                Err(e) => Err(PersistenceError::io(&path, e)),
            }
        })
        .await
        .map_err(|e| PersistenceError::Task(e.to_string()))??;

        let state = match decoded {
            Some(decoded) => RegistryState::from_records(decoded.records, decoded.next_id),
            None => {
                tracing::info!(path = %self.path.display(), "No registry document found, starting empty");
                RegistryState::empty()
            }
        };

        let count = state.records.len();
        *self.write() = state;
        metrics::record_client_count(count);

        tracing::info!(
            path = %self.path.display(),
            clients = count,
            "Registry loaded"
        );
        Ok(count)
    }

    /// Write the current records to disk with an atomic replace.
    ///
    /// The snapshot is copied under the read lock; encoding and all file work
    /// happen after it is released. The temporary file is flushed to disk on a
    /// detached blocking task, so the caller does not wait on `fsync`.
    pub async fn save(&self) -> Result<(), PersistenceError> {
        let _file = self.file_lock.lock().await;

        let (snapshot, next_id) = self.snapshot();
        let path = self.path.clone();
        let tmp = self.temp_path();
        let flusher = Handle::current();

        tokio::task::spawn_blocking(move || {
            let text = codec::encode(&snapshot, next_id)?;
            replace_atomically(&path, &tmp, text.as_bytes(), &flusher)
        })
        .await
        .map_err(|e| PersistenceError::Task(e.to_string()))?
    }

    /// Copies of every record, sorted by id.
    pub fn list(&self) -> Vec<ClientRecord> {
        self.snapshot().0
    }

    fn snapshot(&self) -> (Vec<ClientRecord>, u64) {
        let state = self.read();
        let mut records: Vec<ClientRecord> = state.records.values().cloned().collect();
        let next_id = state.next_id;
        drop(state);
        records.sort_by_key(|r| r.id);
        (records, next_id)
    }

    /// Copy of a single record.
    pub fn get(&self, id: u64) -> Option<ClientRecord> {
        self.read().records.get(&client_key(id)).cloned()
    }

    pub fn exists(&self, id: u64) -> bool {
        self.read().records.contains_key(&client_key(id))
    }

    pub fn len(&self) -> usize {
        self.read().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Id the next created client will receive.
    pub fn next_id(&self) -> u64 {
        self.read().next_id
    }

    /// Look up where traffic from `ip` should go.
    pub fn resolve(&self, ip: &str) -> Resolution {
        let state = self.read();
        let Some(entry) = state.ip_index.get(ip) else {
            return Resolution::Unknown;
        };
        match state.records.get(&client_key(entry.id)) {
            Some(record) if record.enabled => Resolution::Target(entry.proxy_target.clone()),
            Some(_) => Resolution::Disabled,
            None => Resolution::Unknown,
        }
    }

    /// Insert a new record for `source_ip`. In-memory only; see
    /// [`crate::registry::RegistryService::create`] for the persisted variant.
    pub fn create(&self, request: &NewClient, source_ip: &str) -> Result<ClientRecord, RegistryError> {
        let valid = request.validate(source_ip)?;

        let mut state = self.write();
        if state.ip_index.contains_key(&valid.ip) {
            return Err(RegistryError::Conflict(format!(
                "address {} already has a registered client",
                valid.ip
            )));
        }

        let id = state.next_id;
        let key = client_key(id);
        if state.records.contains_key(&key) {
            return Err(RegistryError::Conflict(format!("client key {key} already exists")));
        }

        let record = ClientRecord {
            id,
            ip: valid.ip,
            name: valid.name,
            proxy_target: valid.proxy_target,
            enabled: true,
        };
        state.ip_index.insert(
            record.ip.clone(),
            IpEntry {
                id,
                proxy_target: record.proxy_target.clone(),
            },
        );
        state.records.insert(key, record.clone());
        state.next_id = id + 1;
        let count = state.records.len();
        drop(state);

        metrics::record_client_count(count);
        tracing::info!(id = record.id, ip = %record.ip, name = %record.name, "Client registered");
        Ok(record)
    }

    /// Remove a record and its index entry.
    pub fn delete(&self, id: u64) -> Result<ClientRecord, RegistryError> {
        let mut state = self.write();
        let record = state
            .records
            .remove(&client_key(id))
            .ok_or(RegistryError::NotFound(id))?;
        if state.ip_index.get(&record.ip).map(|e| e.id) == Some(id) {
            state.ip_index.remove(&record.ip);
        }
        let count = state.records.len();
        drop(state);

        metrics::record_client_count(count);
        tracing::info!(id, ip = %record.ip, "Client removed");
        Ok(record)
    }

    /// Flip the enabled flag and return its new value.
    pub fn toggle(&self, id: u64) -> Result<bool, RegistryError> {
        let mut state = self.write();
        let record = state
            .records
            .get_mut(&client_key(id))
            .ok_or(RegistryError::NotFound(id))?;
        record.enabled = !record.enabled;
        let enabled = record.enabled;
        drop(state);

        tracing::info!(id, enabled, "Client toggled");
        Ok(enabled)
    }

    /// `<path>.<unix-nanos>-<seq>.tmp`, unique across concurrent saves.
    fn temp_path(&self) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        let seq = self.tmp_seq.fetch_add(1, Ordering::Relaxed);
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.path.with_file_name(format!("{name}.{nanos}-{seq}{TMP_SUFFIX}"))
    }
}

/// Write `bytes` to `tmp`, request a flush in the background, then rename
/// over `path`. The temporary file is removed if any step fails.
fn replace_atomically(
    path: &Path,
    tmp: &Path,
    bytes: &[u8],
    flusher: &Handle,
) -> Result<(), PersistenceError> {
    let written = File::create(tmp).and_then(|mut file| {
        file.write_all(bytes)?;
        Ok(file)
    });

    let file = match written {
        Ok(file) => file,
        Err(e) => {
            remove_quietly(tmp);
            return Err(PersistenceError::io(tmp, e));
        }
    };

    let synced = tmp.to_path_buf();
    flusher.spawn_blocking(move || {
        if let Err(e) = file.sync_all() {
            tracing::warn!(path = %synced.display(), error = %e, "Background flush of registry file failed");
        }
    });

    if let Err(e) = fs::rename(tmp, path) {
        remove_quietly(tmp);
        return Err(PersistenceError::io(path, e));
    }
    Ok(())
}

fn remove_quietly(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        if e.kind() != ErrorKind::NotFound {
            tracing::warn!(path = %path.display(), error = %e, "Failed to remove temporary registry file");
        }
    }
}

/// Remove `<path>.*.tmp` siblings left by an interrupted save.
fn sweep_stale_temp_files(path: &Path) -> Result<usize, PersistenceError> {
    let Some(name) = path.file_name().map(|n| n.to_string_lossy().into_owned()) else {
        return Ok(0);
    };
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };

    let entries = match fs::read_dir(&dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(PersistenceError::io(&dir, e)),
    };

    let prefix = format!("{name}.");
    let mut removed = 0;
    for entry in entries {
        let entry = entry.map_err(|e| PersistenceError::io(&dir, e))?;
        let file_name = entry.file_name().to_string_lossy().into_owned();
        if file_name.starts_with(&prefix) && file_name.ends_with(TMP_SUFFIX) {
            match fs::remove_file(entry.path()) {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(PersistenceError::io(entry.path(), e)),
            }
        }
    }
    Ok(removed)
}
