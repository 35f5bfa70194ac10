//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! registry, persistence worker, health monitor produce:
//!     → tracing events with structured fields (logging.rs installs the subscriber)
//!     → metrics.rs (gauges and counters, current values only)
//!
//! Consumers:
//!     → stdout (pretty for development, JSON for log aggregation)
//!     → Prometheus scrape endpoint
//! ```
//!
//! # Design Decisions
//! - `RUST_LOG` overrides the configured level
//! - Metric updates are no-ops until a recorder is installed, so library
//!   code and tests record unconditionally

pub mod logging;
pub mod metrics;
