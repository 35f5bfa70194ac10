//! Health checking subsystem.
//!
//! # Data Flow
//! ```text
//! heartbeats.yaml
//!     → targets.rs (settings + target list, loaded once)
//!     → store.rs (LivenessStore, every target Offline)
//!
//! Each interval (monitor.rs):
//!     Spawn round N
//!     → fan out one probe per target (probe.rs), bounded by a semaphore
//!     → each probe applies its result to its target (state.rs)
//!     → probes past the fan-out budget are aborted and count as failures
//!     → report.rs summary published to the store
//! ```
//!
//! # Design Decisions
//! - The target set is fixed at startup; only liveness mutates
//! - Per-target locks, and results from older rounds are dropped, so
//!   overlapping rounds are safe
//! - Probing is unprivileged (TCP connect), never raw ICMP

pub mod monitor;
pub mod probe;
pub mod report;
pub mod state;
pub mod store;
pub mod targets;

pub use monitor::HealthMonitor;
pub use probe::{ProbeError, ProbePlan, Prober, TcpProber};
pub use report::{EndpointError, FailureKind, RoundReport};
pub use state::{Liveness, LivenessState};
pub use store::{HeartbeatTarget, LivenessStore, TargetStatus};
pub use targets::{load_targets, parse_targets, HeartbeatDocument, HeartbeatSettings, TargetsError};
