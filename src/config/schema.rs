//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the control
//! plane. Every section is optional in the file; missing fields take the
//! defaults below.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration for the control plane.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ControlPlaneConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Client registry storage and persistence worker.
    pub registry: RegistryConfig,

    /// Health monitor settings.
    pub health_check: HealthCheckConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address for the admin API and proxy (e.g., "0.0.0.0:8092").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8092".to_string(),
        }
    }
}

/// Client registry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Path of the persisted registry document.
    pub path: PathBuf,

    /// Seconds a delete waits on its save before it stops observing it.
    pub delete_grace_secs: u64,

    /// Pending save requests the persistence worker buffers.
    pub queue_capacity: usize,
}

impl RegistryConfig {
    pub fn delete_grace(&self) -> Duration {
        Duration::from_secs(self.delete_grace_secs)
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("clients.yaml"),
            delete_grace_secs: 15,
            queue_capacity: 64,
        }
    }
}

/// Health monitor configuration.
///
/// Round timing (interval, timeouts, probe count) lives in the heartbeat
/// document next to the targets; these settings shape how rounds execute.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HealthCheckConfig {
    /// Run the health monitor.
    pub enabled: bool,

    /// Path of the heartbeat target document.
    pub targets_path: PathBuf,

    /// Maximum probes in flight across all rounds.
    pub max_concurrent_probes: usize,

    /// Delay between attempts against the same address, in milliseconds.
    pub probe_spacing_ms: u64,

    /// Consecutive successes an offline target needs to become active.
    /// Values above 1 route recovery through the reconnecting state.
    pub recovery_successes: u32,

    /// Port probed when a target address does not name one.
    pub port: u16,
}

impl HealthCheckConfig {
    pub fn probe_spacing(&self) -> Duration {
        Duration::from_millis(self.probe_spacing_ms)
    }
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            targets_path: PathBuf::from("heartbeats.yaml"),
            max_concurrent_probes: 64,
            probe_spacing_ms: 500,
            recovery_successes: 1,
            port: 80,
        }
    }
}

/// Timeout configuration for the HTTP surface.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Request timeout (total time for request/response) in seconds.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self { request_secs: 30 }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log line format.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config: ControlPlaneConfig = toml::from_str("").unwrap();
        assert_eq!(config.listener.bind_address, "0.0.0.0:8092");
        assert_eq!(config.registry.path, PathBuf::from("clients.yaml"));
        assert_eq!(config.registry.delete_grace(), Duration::from_secs(15));
        assert_eq!(config.health_check.probe_spacing(), Duration::from_millis(500));
        assert_eq!(config.observability.log_format, LogFormat::Pretty);
    }

    #[test]
    fn test_partial_sections_keep_other_defaults() {
        let config: ControlPlaneConfig = toml::from_str(
            r#"
            [health_check]
            max_concurrent_probes = 8

            [observability]
            log_format = "json"
            "#,
        )
        .unwrap();
        assert_eq!(config.health_check.max_concurrent_probes, 8);
        assert_eq!(config.health_check.port, 80);
        assert!(config.health_check.enabled);
        assert_eq!(config.observability.log_format, LogFormat::Json);
        assert_eq!(config.observability.log_level, "info");
    }
}
