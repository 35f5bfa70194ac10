//! Client registry subsystem.
//!
//! # Data Flow
//! ```text
//! Admin operation (create / delete / toggle)
//!     → service.rs (validation, mutation, save trigger)
//!     → store.rs (RwLock-guarded records + ip index)
//!     → persistence.rs (single worker, coalesced save requests)
//!     → store.rs save (file lock, snapshot, spawn_blocking)
//!     → codec.rs (YAML document)
//!     → <path>.<stamp>.tmp → rename → <path>
//!
//! Startup:
//!     <path>.*.tmp swept → <path> decoded → records + ip index + next_id
//! ```
//!
//! # Design Decisions
//! - In-memory state is authoritative; a failed save never rolls back a mutation
//! - The memory lock is never held across an await or a disk call
//! - The file lock serializes physical file work only
//! - Ids are monotonic and never reused

pub mod codec;
pub mod error;
pub mod persistence;
pub mod record;
pub mod service;
pub mod store;

pub use error::{PersistenceError, RegistryError};
pub use persistence::{PersistenceHandle, SaveOutcome};
pub use record::{ClientRecord, NewClient};
pub use service::RegistryService;
pub use store::{ClientRegistry, Resolution};
