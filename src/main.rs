//! Reverse-proxy control plane.
//!
//! # Architecture Overview
//!
//! ```text
//!                      ┌──────────────────────────────────────────────────────┐
//!                      │                    CONTROL PLANE                     │
//!                      │                                                      │
//!   Admin / proxied    │  ┌─────────┐    ┌──────────┐    ┌────────────────┐   │
//!   requests ──────────┼─▶│  http   │───▶│  admin   │───▶│    registry    │   │
//!                      │  │ server  │    │ handlers │    │ RwLock + file  │   │
//!                      │  └────┬────┘    └──────────┘    │ lock, atomic   │   │
//!                      │       │ fallback                 │ YAML replace   │   │
//!                      │       ▼                          └───────┬────────┘   │
//!                      │  ┌─────────┐   resolve(ip)               │ saves      │
//!   Target  ◀──────────┼──│  proxy  │◀────────────────────────────┤            │
//!                      │  └─────────┘                     ┌───────▼────────┐   │
//!                      │                                  │  persistence   │   │
//!                      │                                  │    worker      │   │
//!                      │                                  └────────────────┘   │
//!                      │  ┌─────────────────┐   ┌────────────────────────┐    │
//!   Heartbeat ◀────────┼──│ health monitor  │──▶│ liveness store         │    │
//!   targets            │  │ rounds, probes  │   │ + last round report    │    │
//!                      │  └─────────────────┘   └────────────────────────┘    │
//!                      │                                                      │
//!                      │  config · lifecycle · observability                  │
//!                      └──────────────────────────────────────────────────────┘
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;

use proxy_control_plane::config::load_or_default;
use proxy_control_plane::lifecycle::{wait_for_signal, ControlPlane};
use proxy_control_plane::observability::{logging, metrics};

#[derive(Parser)]
#[command(name = "proxy-control-plane")]
#[command(about = "Client registry and health monitor for a reverse-proxy fleet", long_about = None)]
struct Args {
    /// Path to the TOML configuration file. Defaults apply when it is absent.
    #[arg(short, long, default_value = "control-plane.toml")]
    config: PathBuf,

    /// Override the listener bind address.
    #[arg(short, long)]
    bind: Option<SocketAddr>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut config = load_or_default(&args.config)?;
    if let Some(bind) = args.bind {
        config.listener.bind_address = bind.to_string();
    }

    logging::init(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "proxy-control-plane starting");
    if !args.config.exists() {
        tracing::info!(config = %args.config.display(), "Config file not found, using defaults");
    }
    tracing::info!(
        config = %args.config.display(),
        bind_address = %config.listener.bind_address,
        registry = %config.registry.path.display(),
        health_check = config.health_check.enabled,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let plane = ControlPlane::start(config).await?;
    tracing::info!(address = %plane.local_addr()?, "Listening for connections");

    let shutdown = plane.shutdown_handle();
    tokio::spawn(async move {
        wait_for_signal().await;
        shutdown.trigger();
    });

    plane.run().await?;
    Ok(())
}
