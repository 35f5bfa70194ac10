//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, request id, trace, timeout layers)
//!     → /api/* → admin handlers (registry and liveness as JSON)
//!     → anything else → proxy fallback
//!         → registry resolves the caller's ip to a target
//!         → request forwarded with X-Forwarded-Host
//!     → error.rs maps failures to {"error": ...} with a status code
//! ```

pub mod error;
pub mod request;
pub mod server;

pub use error::AppError;
pub use request::{request_id, X_REQUEST_ID};
pub use server::{AppState, HttpServer};
