//! Structured logging setup.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::schema::{LogFormat, ObservabilityConfig};

/// Install the global subscriber.
///
/// The filter comes from `RUST_LOG` when set, otherwise from the configured
/// level applied to this crate and `tower_http`. Calling this twice is a
/// no-op for the second call.
pub fn init(config: &ObservabilityConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "info,proxy_control_plane={level},tower_http={level}",
            level = config.log_level
        ))
    });

    let registry = tracing_subscriber::registry().with(filter);
    let result = match config.log_format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_current_span(false))
            .try_init(),
        LogFormat::Pretty => registry
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .try_init(),
    };

    if let Err(e) = result {
        tracing::debug!(error = %e, "Logging already initialized");
    }
}
