//! Startup orchestration.
//!
//! # Responsibilities
//! - Load the client registry and heartbeat targets
//! - Start the persistence worker and build the health monitor
//! - Bind the listener last, then run until shutdown
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Subsystems initialize in order, not concurrently

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use crate::config::ControlPlaneConfig;
use crate::health::{load_targets, HealthMonitor, LivenessStore, TargetsError};
use crate::http::{AppState, HttpServer};
use crate::lifecycle::shutdown::Shutdown;
use crate::registry::{ClientRegistry, PersistenceError, RegistryService};

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("failed to load client registry: {0}")]
    Registry(#[from] PersistenceError),

    #[error("failed to load heartbeat targets: {0}")]
    Targets(#[from] TargetsError),

    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: io::Error,
    },
}

/// A fully initialized control plane with its listener bound.
pub struct ControlPlane {
    config: ControlPlaneConfig,
    registry: Arc<RegistryService>,
    liveness: Arc<LivenessStore>,
    monitor: Option<Arc<HealthMonitor>>,
    listener: TcpListener,
    shutdown: Shutdown,
    server_shutdown: broadcast::Receiver<()>,
    monitor_shutdown: broadcast::Receiver<()>,
}

impl ControlPlane {
    /// Load state, start background workers and bind the listener.
    pub async fn start(config: ControlPlaneConfig) -> Result<Self, StartupError> {
        let client_registry = Arc::new(ClientRegistry::new(&config.registry.path));
        client_registry.load().await?;

        let (liveness, monitor) = if config.health_check.enabled {
            let document = load_targets(&config.health_check.targets_path)?;
            let liveness = Arc::new(LivenessStore::new(document.targets));
            let monitor = HealthMonitor::new(liveness.clone(), document.settings, &config.health_check);
            (liveness, Some(Arc::new(monitor)))
        } else {
            tracing::info!("Health monitor disabled");
            (Arc::new(LivenessStore::default()), None)
        };

        let registry = Arc::new(RegistryService::start(
            client_registry,
            config.registry.queue_capacity,
            config.registry.delete_grace(),
        ));

        let listener = match TcpListener::bind(&config.listener.bind_address).await {
            Ok(listener) => listener,
            Err(source) => {
                registry.shutdown().await;
                return Err(StartupError::Bind {
                    address: config.listener.bind_address.clone(),
                    source,
                });
            }
        };

        let shutdown = Shutdown::new();
        let server_shutdown = shutdown.subscribe();
        let monitor_shutdown = shutdown.subscribe();

        Ok(Self {
            config,
            registry,
            liveness,
            monitor,
            listener,
            shutdown,
            server_shutdown,
            monitor_shutdown,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Handle that stops [`ControlPlane::run`] when triggered.
    pub fn shutdown_handle(&self) -> Shutdown {
        self.shutdown.clone()
    }

    pub fn registry(&self) -> &Arc<RegistryService> {
        &self.registry
    }

    pub fn liveness(&self) -> &Arc<LivenessStore> {
        &self.liveness
    }

    /// Serve until shutdown, then stop the monitor and drain pending saves.
    pub async fn run(self) -> Result<(), io::Error> {
        let ControlPlane {
            config,
            registry,
            liveness,
            monitor,
            listener,
            shutdown,
            server_shutdown,
            monitor_shutdown,
        } = self;

        let monitor_task = monitor.map(|monitor| tokio::spawn(monitor.run(monitor_shutdown)));

        let server = HttpServer::new(AppState::new(registry.clone(), liveness), &config.timeouts);
        let served = server.run(listener, server_shutdown).await;
        // The server may also have stopped on an error.
        shutdown.trigger();

        if let Some(task) = monitor_task {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "Health monitor task failed");
            }
        }
        registry.shutdown().await;

        tracing::info!("Shutdown complete");
        served
    }
}
