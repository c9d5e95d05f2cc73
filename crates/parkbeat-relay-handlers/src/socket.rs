use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use parkbeat_relay_appstate::AppState;
use parkbeat_relay_types::SocketId;
use parkbeat_relay_types::events::{
    ClientEvent, ErrorFrame, ServerEvent, decode_client_frame, encode_server_frame,
};
use parkbeat_relay_types::rooms::RoomKind;
use serde::Deserialize;
use tracing::{debug, error, warn};

use crate::{jobs, project};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectParams {
    /// Opaque user identifier attached upstream; authentication is not the
    /// relay's concern.
    pub user_id: Option<String>,
}

pub async fn socket_handler(
    State(state): State<AppState>,
    Query(params): Query<ConnectParams>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state, params.user_id))
}

/// One task per connection: assign the socket id, announce it, pump frames
/// both ways, and enqueue cleanup the moment the transport goes away.
async fn handle_socket(socket: WebSocket, state: AppState, user_id: Option<String>) {
    let socket_id = SocketId::new();
    let mut outbound = state.connections.register(&socket_id, user_id);
    let (mut sink, mut stream) = socket.split();

    let writer_id = socket_id.clone();
    let writer = tokio::spawn(async move {
        while let Some(event) = outbound.recv().await {
            match encode_server_frame(&event) {
                Ok(text) => {
                    if sink.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Err(e) => warn!("Failed to encode {} for {writer_id}: {e}", event.kind()),
            }
        }
        let _ = sink.close().await;
    });

    if state
        .connections
        .send(&socket_id, ServerEvent::ProvideSocketId(socket_id.clone()))
        .await
        .is_err()
    {
        warn!("Socket {socket_id} closed before the id handshake");
    }

    // every connecting process drains the shared cleanup queue; sockets this
    // instance still owns stay queued until they actually disconnect
    {
        let cleanup = state.cleanup.clone();
        let connections = state.connections.clone();
        tokio::spawn(async move {
            if let Err(e) = cleanup
                .drain_with_filter(|socket| connections.is_connected(socket))
                .await
            {
                warn!("Cleanup drain on connect failed: {e}");
            }
        });
    }

    while let Some(inbound) = stream.next().await {
        match inbound {
            Ok(Message::Text(text)) => match decode_client_frame(text.as_str()) {
                Ok(event) => dispatch(&state, &socket_id, event).await,
                Err(e) => debug!("Dropping frame from {socket_id}: {e}"),
            },
            Ok(Message::Binary(_)) => {
                warn!("Closing {socket_id}: binary frames are not accepted");
                break;
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {} // transport-level ping/pong
            Err(e) => {
                debug!("Socket {socket_id} errored: {e}");
                break;
            }
        }
        // killActiveSockets can pull the registration out from under us
        if !state.connections.is_connected(&socket_id) {
            break;
        }
    }

    state.connections.deregister(&socket_id);
    // enqueue only; never block teardown on the cleanup itself
    if let Err(e) = state
        .cleanup
        .enqueue(&socket_id, vec![RoomKind::Geohash, RoomKind::Project])
        .await
    {
        error!("Failed to enqueue cleanup for {socket_id}: {e}");
    }
    writer.abort();
    debug!("Socket {socket_id} torn down");
}

/// Routes one decoded event to its handler. Handler failures become `error`
/// frames on the originating socket; nothing is fanned out for a failed
/// operation.
pub async fn dispatch(state: &AppState, socket_id: &SocketId, event: ClientEvent) {
    let kind = event.kind();
    let result = match event {
        ClientEvent::Ping => project::ping(state, socket_id).await,
        ClientEvent::Subscribe(request) => {
            project::subscribe_geohash(state, socket_id, request).await
        }
        ClientEvent::SubscribeProject(request) => {
            project::subscribe_project(state, socket_id, request).await
        }
        ClientEvent::SetProject(draft) => project::set_project(state, socket_id, draft).await,
        ClientEvent::DeleteProject(request) => {
            project::delete_project(state, socket_id, request).await
        }
        ClientEvent::AddContribution(contribution) => {
            project::add_contribution(state, socket_id, contribution).await
        }
        ClientEvent::ValidateImage(request) => {
            jobs::validate_image(state, socket_id, request).await
        }
    };

    if let Err(err) = result {
        if err.is_business_error() {
            debug!("{kind} from {socket_id} rejected: {err}");
        } else {
            error!("{kind} from {socket_id} failed: {err}");
        }
        let _ = state
            .connections
            .send(socket_id, ServerEvent::Error(ErrorFrame::from(&err)))
            .await;
    }
}
