//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router with admin routes and the proxy fallback
//! - Wire up middleware (request ID, tracing, timeout)
//! - Serve on a bound listener until shutdown
//! - Forward unmatched requests to the caller's registered target

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{header, HeaderValue, Request, Uri, Version},
    response::{IntoResponse, Response},
    Router,
};
use hyper::body::Incoming;
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower::ServiceBuilder;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use url::Url;

use crate::admin;
use crate::config::TimeoutConfig;
use crate::health::LivenessStore;
use crate::http::error::AppError;
use crate::http::request::{self, request_id};
use crate::registry::{RegistryService, Resolution};

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<RegistryService>,
    pub liveness: Arc<LivenessStore>,
    pub client: Client<HttpConnector, Body>,
}

impl AppState {
    pub fn new(registry: Arc<RegistryService>, liveness: Arc<LivenessStore>) -> Self {
        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());
        Self {
            registry,
            liveness,
            client,
        }
    }
}

/// HTTP server for the admin API and the proxy.
pub struct HttpServer {
    router: Router,
}

impl HttpServer {
    pub fn new(state: AppState, timeouts: &TimeoutConfig) -> Self {
        Self {
            router: Self::build_router(state, timeouts),
        }
    }

    /// Build the Axum router with all middleware layers, outermost first.
    #[allow(deprecated)]
    fn build_router(state: AppState, timeouts: &TimeoutConfig) -> Router {
        Router::new()
            .merge(admin::routes())
            .fallback(proxy_handler)
            .with_state(state)
            .layer(
                ServiceBuilder::new()
                    .layer(request::set_request_id_layer())
                    .layer(TraceLayer::new_for_http())
                    .layer(request::propagate_request_id_layer())
                    .layer(TimeoutLayer::new(Duration::from_secs(timeouts.request_secs))),
            )
    }

    /// Run the server, accepting connections on the given listener until
    /// `shutdown` fires. In-flight requests are allowed to finish.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("HTTP server no longer accepting connections");
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Forward the request to the target registered for the caller's address.
async fn proxy_handler(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request<Body>,
) -> Response {
    let start_time = Instant::now();
    let request_id = request_id(request.headers()).to_string();
    let caller = addr.ip().to_canonical().to_string();

    let target = match state.registry.resolve(&caller) {
        Resolution::Target(target) => target,
        Resolution::Disabled => {
            tracing::debug!(request_id = %request_id, caller = %caller, "Proxy disabled for caller");
            return AppError::ProxyDisabled.into_response();
        }
        Resolution::Unknown => {
            tracing::debug!(request_id = %request_id, caller = %caller, "No client registered for caller");
            return AppError::NotRegistered(caller).into_response();
        }
    };

    let (mut parts, body) = request.into_parts();
    let upstream = match Url::parse(&target)
        .map_err(|e| e.to_string())
        .and_then(|url| upstream_uri(&url, &parts.uri))
    {
        Ok(uri) => uri,
        Err(e) => {
            tracing::error!(request_id = %request_id, target = %target, error = %e, "Invalid proxy target");
            return AppError::Upstream(e).into_response();
        }
    };

    if let Some(host) = parts.headers.get(header::HOST).cloned() {
        parts.headers.insert("x-forwarded-host", host);
    }
    if let Some(authority) = upstream.authority() {
        if let Ok(value) = HeaderValue::from_str(authority.as_str()) {
            parts.headers.insert(header::HOST, value);
        }
    }
    parts.version = Version::HTTP_11;
    parts.uri = upstream;

    tracing::debug!(
        request_id = %request_id,
        method = %parts.method,
        upstream = %parts.uri,
        "Proxying request"
    );

    match state.client.request(Request::from_parts(parts, body)).await {
        Ok(response) => {
            tracing::debug!(
                request_id = %request_id,
                status = %response.status(),
                target = %target,
                elapsed_ms = start_time.elapsed().as_millis() as u64,
                "Upstream responded"
            );
            upstream_response(response)
        }
        Err(e) => {
            tracing::warn!(request_id = %request_id, target = %target, error = %e, "Upstream error");
            AppError::Upstream(e.to_string()).into_response()
        }
    }
}

fn upstream_response(response: hyper::Response<Incoming>) -> Response {
    let (parts, body) = response.into_parts();
    Response::from_parts(parts, Body::new(body))
}

/// Join the target's base path with the request's path and query.
fn upstream_uri(target: &Url, original: &Uri) -> Result<Uri, String> {
    let host = target
        .host_str()
        .ok_or_else(|| format!("target {target} has no host"))?;
    let authority = match target.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    };
    let base = target.path().trim_end_matches('/');
    let path_and_query = original
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");

    Uri::builder()
        .scheme(target.scheme())
        .authority(authority)
        .path_and_query(format!("{base}{path_and_query}"))
        .build()
        .map_err(|e| e.to_string())
}
