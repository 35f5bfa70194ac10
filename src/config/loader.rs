//! Configuration loading from disk.

use std::fs;
use std::io;
use std::path::Path;

use thiserror::Error;

use crate::config::schema::ControlPlaneConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation failed: {}", join(.0))]
    Validation(Vec<ValidationError>),
}

fn join(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<ControlPlaneConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    parse_config(&content)
}

/// Parse and validate configuration text.
pub fn parse_config(content: &str) -> Result<ControlPlaneConfig, ConfigError> {
    let config: ControlPlaneConfig = toml::from_str(content)?;
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Load `path` if it exists, falling back to defaults when it does not.
///
/// Any other read failure, a parse error or a validation error is returned.
pub fn load_or_default(path: &Path) -> Result<ControlPlaneConfig, ConfigError> {
    match fs::read_to_string(path) {
        Ok(content) => parse_config(&content),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(ControlPlaneConfig::default()),
        Err(e) => Err(ConfigError::Io(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_config_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("control-plane.toml");
        fs::write(
            &path,
            "[listener]\nbind_address = \"127.0.0.1:9000\"\n\n[registry]\npath = \"/var/lib/cp/clients.yaml\"\n",
        )
        .unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.listener.bind_address, "127.0.0.1:9000");
        assert_eq!(config.registry.path, Path::new("/var/lib/cp/clients.yaml"));
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");

        assert!(matches!(load_config(&path), Err(ConfigError::Io(_))));
        let config = load_or_default(&path).unwrap();
        assert_eq!(config.listener.bind_address, "0.0.0.0:8092");
    }

    #[test]
    fn test_parse_and_validation_errors() {
        assert!(matches!(parse_config("[listener"), Err(ConfigError::Parse(_))));

        let err = parse_config("[timeouts]\nrequest_secs = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Validation(ref errors) if errors.len() == 1));
        assert!(err.to_string().contains("timeouts.request_secs"));
    }
}
