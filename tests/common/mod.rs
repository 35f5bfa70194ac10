//! Shared utilities for integration testing.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use axum::http::{HeaderMap, Uri};
use axum::{Json, Router};
use proxy_control_plane::config::ControlPlaneConfig;
use proxy_control_plane::lifecycle::{ControlPlane, Shutdown};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// Configuration rooted in `dir`, listening on an ephemeral port with the
/// health monitor and metrics off.
pub fn config(dir: &Path) -> ControlPlaneConfig {
    let mut config = ControlPlaneConfig::default();
    config.listener.bind_address = "127.0.0.1:0".to_string();
    config.registry.path = dir.join("clients.yaml");
    config.health_check.enabled = false;
    config.health_check.targets_path = dir.join("heartbeats.yaml");
    config.observability.metrics_enabled = false;
    config
}

/// Write a heartbeat document into `dir` and return its path.
#[allow(dead_code)]
pub fn write_heartbeats(dir: &Path, body: &str) -> PathBuf {
    let path = dir.join("heartbeats.yaml");
    std::fs::write(&path, body).unwrap();
    path
}

/// A control plane running on a background task.
pub struct TestPlane {
    pub addr: SocketAddr,
    pub shutdown: Shutdown,
    pub handle: JoinHandle<std::io::Result<()>>,
    pub http: reqwest::Client,
}

impl TestPlane {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Trigger shutdown and wait for pending saves to drain.
    pub async fn stop(self) {
        self.shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(10), self.handle)
            .await
            .expect("control plane did not stop")
            .unwrap()
            .unwrap();
    }
}

pub async fn spawn(config: ControlPlaneConfig) -> TestPlane {
    let plane = match ControlPlane::start(config).await {
        Ok(plane) => plane,
        Err(e) => panic!("control plane failed to start: {e}"),
    };
    let addr = plane.local_addr().unwrap();
    let shutdown = plane.shutdown_handle();
    let handle = tokio::spawn(plane.run());

    // Non-pooled client so shutdown never waits on idle keep-alives.
    let http = reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .build()
        .unwrap();

    TestPlane {
        addr,
        shutdown,
        handle,
        http,
    }
}

/// Start a backend that echoes the request path and forwarding headers.
#[allow(dead_code)]
pub async fn start_echo_backend() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let app = Router::new().fallback(|headers: HeaderMap, uri: Uri| async move {
        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        Json(json!({
            "path": uri.path_and_query().map(|pq| pq.as_str().to_string()),
            "host": header("host"),
            "forwarded_host": header("x-forwarded-host"),
        }))
    });

    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    addr
}

/// Poll `check` every 50ms until it returns true or `within` elapses.
#[allow(dead_code)]
pub async fn eventually<F, Fut>(within: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + within;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

#[allow(dead_code)]
pub async fn get_json(plane: &TestPlane, path: &str) -> Value {
    plane
        .http
        .get(plane.url(path))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap()
}
