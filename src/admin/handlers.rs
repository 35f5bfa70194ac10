use std::net::SocketAddr;

use axum::{
    extract::{rejection::JsonRejection, ConnectInfo, Path, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;

use crate::health::{RoundReport, TargetStatus};
use crate::http::error::AppError;
use crate::http::server::AppState;
use crate::registry::{ClientRecord, NewClient};

#[derive(Debug, Serialize)]
pub struct ToggleResponse {
    pub enabled: bool,
}

fn parse_id(raw: &str) -> Result<u64, AppError> {
    raw.parse::<u64>()
        .ok()
        .filter(|id| *id > 0)
        .ok_or_else(|| AppError::BadRequest(format!("invalid client id `{raw}`")))
}

pub async fn list_clients(State(state): State<AppState>) -> Json<Vec<ClientRecord>> {
    Json(state.registry.list())
}

/// Register a client for the caller's address.
pub async fn create_client(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    body: Result<Json<NewClient>, JsonRejection>,
) -> Result<(StatusCode, Json<ClientRecord>), AppError> {
    let Json(request) = body.map_err(|e| AppError::BadRequest(e.body_text()))?;
    let caller = addr.ip().to_canonical().to_string();

    let record = state.registry.create(request, &caller).await?;
    Ok((StatusCode::CREATED, Json(record)))
}

pub async fn delete_client(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    let id = parse_id(&id)?;
    state.registry.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn toggle_client(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ToggleResponse>, AppError> {
    let id = parse_id(&id)?;
    let enabled = state.registry.toggle(id)?;
    Ok(Json(ToggleResponse { enabled }))
}

pub async fn list_heartbeats(State(state): State<AppState>) -> Json<Vec<TargetStatus>> {
    Json(state.liveness.snapshot())
}

/// Report of the most recent health round, `null` before the first one.
pub async fn get_last_round(State(state): State<AppState>) -> Json<Option<RoundReport>> {
    Json(state.liveness.last_round())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_id() {
        assert_eq!(parse_id("12").unwrap(), 12);
        assert!(matches!(parse_id("0"), Err(AppError::BadRequest(_))));
        assert!(matches!(parse_id("client1"), Err(AppError::BadRequest(_))));
        assert!(matches!(parse_id("-1"), Err(AppError::BadRequest(_))));
    }
}
