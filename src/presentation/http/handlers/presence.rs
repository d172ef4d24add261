//! Presence and Gateway Handlers
//!
//! Read-only views of the connection hub for operator tooling.

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;

use crate::presentation::websocket::{GatewayStats, OnlineUser};
use crate::shared::error::{AppError, GatewayError};
use crate::startup::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceResponse {
    pub count: usize,
    pub users: Vec<OnlineUser>,
}

impl From<Vec<OnlineUser>> for PresenceResponse {
    fn from(users: Vec<OnlineUser>) -> Self {
        Self {
            count: users.len(),
            users,
        }
    }
}

fn hub_unavailable(err: GatewayError) -> AppError {
    AppError::Unavailable(err.to_string())
}

/// Get every online user
///
/// GET /api/v1/presence/users
pub async fn list_online_users(
    State(state): State<AppState>,
) -> Result<Json<PresenceResponse>, AppError> {
    let users = state
        .gateway
        .connected_users()
        .await
        .map_err(hub_unavailable)?;
    Ok(Json(users.into()))
}

/// Get the online members of a crew
///
/// GET /api/v1/presence/crews/{crew_id}
pub async fn list_crew_online(
    State(state): State<AppState>,
    Path(crew_id): Path<String>,
) -> Result<Json<PresenceResponse>, AppError> {
    let users = state
        .gateway
        .crew_online(crew_id)
        .await
        .map_err(hub_unavailable)?;
    Ok(Json(users.into()))
}

/// Get registry sizes
///
/// GET /api/v1/gateway/stats
pub async fn gateway_stats(State(state): State<AppState>) -> Result<Json<GatewayStats>, AppError> {
    let stats = state.gateway.stats().await.map_err(hub_unavailable)?;
    Ok(Json(stats))
}
