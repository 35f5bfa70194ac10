//! Reverse-proxy control plane library.

pub mod admin;
pub mod config;
pub mod health;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod registry;

pub use config::schema::ControlPlaneConfig;
pub use http::HttpServer;
pub use lifecycle::{ControlPlane, Shutdown};
