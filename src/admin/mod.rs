//! Administrative API: registry operations and liveness as JSON resources.
//!
//! No authentication; the API is meant for a trusted network.

pub mod handlers;

use axum::{
    routing::{delete, get, post},
    Router,
};

use self::handlers::*;
use crate::http::server::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/clients", get(list_clients))
        .route("/api/clients/create", post(create_client))
        .route("/api/clients/{id}", delete(delete_client))
        .route("/api/clients/{id}/toggle", post(toggle_client))
        .route("/api/heartbeats", get(list_heartbeats))
        .route("/api/heartbeats/last-round", get(get_last_round))
}
