use std::future::Future;

use parkbeat_relay_appstate::AppState;
use parkbeat_relay_store::clusters::cluster_snapshot;
use parkbeat_relay_types::errors::RelayError;
use parkbeat_relay_types::events::{
    DeleteProjectRequest, GeohashRef, ProjectDataFrame, ServerEvent, SubscribeProjectRequest,
    SubscribeRequest, SubscribeSnapshot,
};
use parkbeat_relay_types::geo::encode_geohash;
use parkbeat_relay_types::rooms::Room;
use parkbeat_relay_types::{ContributionDraft, ProjectDraft, ProjectStatus, RelayResult, SocketId};
use tracing::debug;

/// One inline retry for transient storage failures; business errors pass
/// straight through.
pub(crate) async fn retry_once<T, F, Fut>(op: F) -> RelayResult<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = RelayResult<T>>,
{
    match op().await {
        Ok(value) => Ok(value),
        Err(err) if !err.is_business_error() => {
            debug!("Retrying after transient failure: {err}");
            op().await
        }
        Err(err) => Err(err),
    }
}

fn caller(state: &AppState, socket_id: &SocketId) -> String {
    state
        .connections
        .user_id(socket_id)
        .unwrap_or_else(|| "anonymous".to_string())
}

/// Liveness refresh. The pong goes out droppable; the per-room heartbeats
/// ride the sweeper.
pub async fn ping(state: &AppState, socket_id: &SocketId) -> RelayResult<()> {
    state.connections.record_ping(socket_id);
    state.registry.refresh_liveness(socket_id).await?;
    state.connections.send_droppable(socket_id, ServerEvent::Pong);
    Ok(())
}

/// Upsert, then fan out: `newProject` across the geohash prefix rooms
/// (originator excluded, it has optimistic state) and a full `projectData`
/// snapshot to the project room.
pub async fn set_project(
    state: &AppState,
    socket_id: &SocketId,
    draft: ProjectDraft,
) -> RelayResult<()> {
    let user_id = caller(state, socket_id);
    let geohash = encode_geohash(draft.lat, draft.lng)?;

    if let Some(existing) = retry_once(|| state.store.get_project(&draft.id)).await?
        && existing.created_by != user_id
    {
        return Err(RelayError::NotAuthorized(format!(
            "project {} belongs to {}",
            existing.id, existing.created_by
        )));
    }

    retry_once(|| state.store.upsert_project(&draft, &geohash, &user_id)).await?;
    // read back the authoritative record; the store owns timestamps
    let project = retry_once(|| state.store.get_project(&draft.id))
        .await?
        .ok_or_else(|| RelayError::StoreError(format!("upsert of {} did not persist", draft.id)))?;

    state
        .fanout
        .fanout_geohash(
            &project.geohash,
            &ServerEvent::NewProject(project.clone()),
            Some(socket_id),
        )
        .await?;
    emit_project_data(state, &project.id, None).await
}

/// Rejects deletion of active projects, then walks the **previous** stored
/// geohash so subscribers of the old location hear about the removal.
pub async fn delete_project(
    state: &AppState,
    socket_id: &SocketId,
    request: DeleteProjectRequest,
) -> RelayResult<()> {
    let project = retry_once(|| state.store.get_project(&request.id))
        .await?
        .ok_or_else(|| RelayError::ProjectNotFound(request.id.clone()))?;

    if project.status == ProjectStatus::Active {
        return Err(RelayError::CannotDeleteActive(project.id));
    }

    let previous = retry_once(|| state.store.delete_project(&request.id))
        .await?
        .ok_or_else(|| RelayError::ProjectNotFound(request.id.clone()))?;

    let event = ServerEvent::DeleteProject(DeleteProjectRequest {
        id: previous.id.clone(),
    });
    state
        .fanout
        .fanout_geohash(&previous.geohash, &event, Some(socket_id))
        .await?;
    state.fanout.fanout_project(&previous.id, &event, Some(socket_id)).await?;
    Ok(())
}

/// Geohash-room membership plus the initial snapshot tuple.
pub async fn subscribe_geohash(
    state: &AppState,
    socket_id: &SocketId,
    request: SubscribeRequest,
) -> RelayResult<()> {
    let room = Room::geohash(&request.geohash);
    if !request.should_subscribe {
        state.connections.leave_room(socket_id, &room);
        state
            .registry
            .unsubscribe_geohash(socket_id, &request.geohash)
            .await?;
        return Ok(());
    }

    state.connections.join_room(socket_id, room);
    state
        .registry
        .subscribe_geohash(socket_id, &request.geohash)
        .await?;

    let matches = retry_once(|| state.store.projects_with_prefix(&request.geohash)).await?;
    // the socket may have closed while the snapshot query ran
    if !state.connections.is_connected(socket_id) {
        debug!("Discarding snapshot for {socket_id}, socket went away");
        return Ok(());
    }
    let (projects, groups) = cluster_snapshot(&request.geohash, matches);
    state
        .connections
        .send(
            socket_id,
            ServerEvent::Subscribe(SubscribeSnapshot(
                GeohashRef {
                    geohash: request.geohash,
                },
                projects,
                groups,
            )),
        )
        .await
}

/// Project-room membership; joining delivers the current `projectData`
/// snapshot to the requesting socket.
pub async fn subscribe_project(
    state: &AppState,
    socket_id: &SocketId,
    request: SubscribeProjectRequest,
) -> RelayResult<()> {
    let room = Room::project(&request.project_id);
    if !request.should_subscribe {
        state.connections.leave_room(socket_id, &room);
        state
            .registry
            .unsubscribe_project(socket_id, &request.project_id)
            .await?;
        return Ok(());
    }

    state.connections.join_room(socket_id, room);
    state
        .registry
        .subscribe_project(socket_id, &request.project_id)
        .await?;

    let snapshot = retry_once(|| state.store.snapshot(&request.project_id)).await?;
    if !state.connections.is_connected(socket_id) {
        debug!("Discarding snapshot for {socket_id}, socket went away");
        return Ok(());
    }
    match snapshot {
        Some(data) => {
            state
                .connections
                .send(
                    socket_id,
                    ServerEvent::ProjectData(ProjectDataFrame {
                        project_id: request.project_id,
                        data,
                    }),
                )
                .await
        }
        // subscribing to a project that does not exist yet is allowed; the
        // snapshot arrives with the first setProject
        None => Ok(()),
    }
}

/// Dedup by id happens in the store; either way the refreshed snapshot goes
/// to the project room and every prefix room of the project's location.
pub async fn add_contribution(
    state: &AppState,
    _socket_id: &SocketId,
    contribution: ContributionDraft,
) -> RelayResult<()> {
    let project_id = contribution.project_id.clone();
    retry_once(|| state.store.add_contribution(&contribution)).await?;

    let project = retry_once(|| state.store.get_project(&project_id))
        .await?
        .ok_or_else(|| RelayError::ProjectNotFound(project_id.clone()))?;

    emit_project_data(state, &project_id, Some(&project.geohash)).await
}

/// `projectData` fan-out: always the project room, optionally the geohash
/// prefix rooms too.
async fn emit_project_data(
    state: &AppState,
    project_id: &str,
    geohash: Option<&str>,
) -> RelayResult<()> {
    let Some(data) = retry_once(|| state.store.snapshot(project_id)).await? else {
        return Err(RelayError::SnapshotError(format!(
            "no snapshot for project {project_id}"
        )));
    };
    let event = ServerEvent::ProjectData(ProjectDataFrame {
        project_id: project_id.to_string(),
        data,
    });
    state.fanout.fanout_project(project_id, &event, None).await?;
    if let Some(geohash) = geohash {
        state.fanout.fanout_geohash(geohash, &event, None).await?;
    }
    Ok(())
}
