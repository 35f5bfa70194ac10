//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML), optional
//!     → loader.rs (read & deserialize, defaults when absent)
//!     → validation.rs (semantic checks)
//!     → ControlPlaneConfig (validated, immutable)
//!     → sections handed to each subsystem at startup
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require a restart
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, load_or_default, ConfigError};
pub use schema::{
    ControlPlaneConfig, HealthCheckConfig, ListenerConfig, LogFormat, ObservabilityConfig,
    RegistryConfig, TimeoutConfig,
};
pub use validation::{validate_config, ValidationError};
