//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Config → registry load → heartbeat load → persistence worker
//!     → health monitor → listener
//!
//! Shutdown (shutdown.rs):
//!     Signal received → stop accepting → stop monitor → drain saves → exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Fail fast: a registry or heartbeat document that cannot be decoded is
//!   fatal
//! - Listener binds last, so traffic only arrives once state is loaded
//! - Pending saves are drained before exit, never abandoned

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
pub use signals::wait_for_signal;
pub use startup::{ControlPlane, StartupError};
