//! Heartbeat target document.
//!
//! ```yaml
//! interval: 30s
//! timeout: 10s
//! max_missed_heartbeats: 3
//! max_missed_heartbeats_timeout: 15s
//! heartbeats:
//!   edge-1:
//!     ip: 10.0.0.5
//! ```
//!
//! Every scalar is optional. Durations accept `30s`, `500ms`, `2m` or a bare
//! number of seconds.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

/// Errors loading the heartbeat document. All are fatal at startup.
#[derive(Debug, Error)]
pub enum TargetsError {
    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("heartbeat document decode error: {0}")]
    Decode(#[from] serde_yaml::Error),

    #[error("invalid heartbeat document: {0}")]
    Invalid(String),
}

/// Round timing shared by every target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartbeatSettings {
    /// Time between rounds.
    pub interval: Duration,
    /// Budget of a single probe attempt.
    pub timeout: Duration,
    /// Probe attempts per target per round.
    pub max_missed: u32,
    /// Budget of a round's fan-out.
    pub max_missed_timeout: Duration,
}

impl HeartbeatSettings {
    /// Overall deadline of one round: the fan-out budget plus one probe
    /// timeout for cleanup and reporting.
    pub fn round_budget(&self) -> Duration {
        self.max_missed_timeout.saturating_add(self.timeout)
    }
}

impl Default for HeartbeatSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            timeout: Duration::from_secs(10),
            max_missed: 3,
            max_missed_timeout: Duration::from_secs(15),
        }
    }
}

/// Parsed document: settings plus `(name, address)` pairs sorted by name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeartbeatDocument {
    pub settings: HeartbeatSettings,
    pub targets: Vec<(String, String)>,
}

/// Upper bound of any configured duration.
pub const MAX_DURATION: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawDocument {
    interval: Option<DurationValue>,
    timeout: Option<DurationValue>,
    max_missed_heartbeats: Option<u32>,
    max_missed_heartbeats_timeout: Option<DurationValue>,
    heartbeats: Option<BTreeMap<String, RawTarget>>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum DurationValue {
    Seconds(u64),
    Text(String),
}

#[derive(Debug, Deserialize)]
struct RawTarget {
    ip: String,
}

/// Read and parse the document at `path`.
pub fn load_targets(path: &Path) -> Result<HeartbeatDocument, TargetsError> {
    let text = fs::read_to_string(path).map_err(|source| TargetsError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let document = parse_targets(&text)?;

    tracing::info!(
        path = %path.display(),
        targets = document.targets.len(),
        interval_secs = document.settings.interval.as_secs_f64(),
        "Heartbeat targets loaded"
    );
    Ok(document)
}

/// Parse document text.
pub fn parse_targets(text: &str) -> Result<HeartbeatDocument, TargetsError> {
    let raw: RawDocument = if text.trim().is_empty() {
        RawDocument::default()
    } else {
        serde_yaml::from_str(text)?
    };

    let defaults = HeartbeatSettings::default();
    let settings = HeartbeatSettings {
        interval: duration_field("interval", raw.interval, defaults.interval)?,
        timeout: duration_field("timeout", raw.timeout, defaults.timeout)?,
        max_missed: raw.max_missed_heartbeats.unwrap_or(defaults.max_missed),
        max_missed_timeout: duration_field(
            "max_missed_heartbeats_timeout",
            raw.max_missed_heartbeats_timeout,
            defaults.max_missed_timeout,
        )?,
    };
    if settings.max_missed == 0 {
        return Err(TargetsError::Invalid(
            "max_missed_heartbeats must be at least 1".to_string(),
        ));
    }

    let mut targets = Vec::new();
    for (name, target) in raw.heartbeats.unwrap_or_default() {
        let ip = target.ip.trim();
        if ip.is_empty() {
            return Err(TargetsError::Invalid(format!("heartbeat `{name}` has no ip")));
        }
        targets.push((name, ip.to_string()));
    }

    Ok(HeartbeatDocument { settings, targets })
}

fn duration_field(
    field: &str,
    value: Option<DurationValue>,
    default: Duration,
) -> Result<Duration, TargetsError> {
    let duration = match value {
        None => return Ok(default),
        Some(DurationValue::Seconds(secs)) => Duration::from_secs(secs),
        Some(DurationValue::Text(text)) => parse_duration(&text).ok_or_else(|| {
            TargetsError::Invalid(format!("{field}: `{text}` is not a duration"))
        })?,
    };
    if duration.is_zero() {
        return Err(TargetsError::Invalid(format!("{field} must be greater than zero")));
    }
    if duration > MAX_DURATION {
        return Err(TargetsError::Invalid(format!(
            "{field} must not exceed {}s",
            MAX_DURATION.as_secs()
        )));
    }
    Ok(duration)
}

/// Parse a duration string like "5s", "500ms", "1m" or "30".
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(secs) = s.strip_suffix('s') {
        if let Some(ms) = secs.strip_suffix('m') {
            ms.trim().parse::<u64>().ok().map(Duration::from_millis)
        } else {
            secs.trim().parse::<u64>().ok().map(Duration::from_secs)
        }
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.trim()
            .parse::<u64>()
            .ok()
            .and_then(|m| m.checked_mul(60))
            .map(Duration::from_secs)
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}
