//! Configuration validation.
//!
//! Serde handles syntax; this checks value ranges and addresses. Every
//! problem is reported, not just the first.

use std::fmt;
use std::net::SocketAddr;

use crate::config::schema::ControlPlaneConfig;

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field.
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Check a parsed configuration.
pub fn validate_config(config: &ControlPlaneConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("`{}` is not a socket address", config.listener.bind_address),
        ));
    }

    if config.registry.path.as_os_str().is_empty() {
        errors.push(ValidationError::new("registry.path", "must not be empty"));
    }
    if config.registry.queue_capacity == 0 {
        errors.push(ValidationError::new("registry.queue_capacity", "must be at least 1"));
    }

    let health = &config.health_check;
    if health.enabled && health.targets_path.as_os_str().is_empty() {
        errors.push(ValidationError::new("health_check.targets_path", "must not be empty"));
    }
    if health.max_concurrent_probes == 0 {
        errors.push(ValidationError::new(
            "health_check.max_concurrent_probes",
            "must be at least 1",
        ));
    }
    if health.recovery_successes == 0 {
        errors.push(ValidationError::new(
            "health_check.recovery_successes",
            "must be at least 1",
        ));
    }
    if health.port == 0 {
        errors.push(ValidationError::new("health_check.port", "must not be 0"));
    }

    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::new("timeouts.request_secs", "must be greater than 0"));
    }

    let obs = &config.observability;
    if !matches!(
        obs.log_level.to_ascii_lowercase().as_str(),
        "trace" | "debug" | "info" | "warn" | "error"
    ) {
        errors.push(ValidationError::new(
            "observability.log_level",
            format!("unknown level `{}`", obs.log_level),
        ));
    }
    if obs.metrics_enabled && obs.metrics_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("`{}` is not a socket address", obs.metrics_address),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
