use axum::Json;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use parkbeat_relay_appstate::AppState;
use parkbeat_relay_types::errors::RelayError;
use parkbeat_relay_types::rooms::{RoomKind, cleanup_queue_key};
use parkbeat_relay_types::{Project, RelayResult, SocketId};
use serde::Deserialize;
use tracing::info;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KillSocketsRequest {
    pub socket_id: String,
}

/// Self-diagnostic teardown: reclaim every registry record for the socket and
/// drop it locally if this instance happens to own it.
pub async fn kill_active_sockets(
    State(state): State<AppState>,
    Json(body): Json<KillSocketsRequest>,
) -> RelayResult<StatusCode> {
    let socket_id = SocketId::from(body.socket_id.as_str());
    info!("killActiveSockets requested for {socket_id}");
    state
        .registry
        .cleanup(&socket_id, &[RoomKind::Geohash, RoomKind::Project])
        .await?;
    state
        .kv
        .hdel(&cleanup_queue_key(), socket_id.as_str())
        .await?;
    state.connections.deregister(&socket_id);
    Ok(StatusCode::OK)
}

#[derive(Debug, Clone, Deserialize)]
pub struct GetProjectParams {
    pub id: String,
}

pub async fn get_project(
    State(state): State<AppState>,
    Query(params): Query<GetProjectParams>,
) -> RelayResult<Json<Project>> {
    state
        .store
        .get_project(&params.id)
        .await?
        .map(Json)
        .ok_or(RelayError::ProjectNotFound(params.id))
}
