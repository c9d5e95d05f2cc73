pub mod jobs;
pub mod project;
pub mod rest;
pub mod socket;

use axum::Router;
use axum::routing::{any, get, post};
use parkbeat_relay_appstate::AppState;

/// The relay's full HTTP surface: the socket endpoint plus the small
/// diagnostic REST API.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/socket", any(socket::socket_handler))
        .route("/api/tree/killActiveSockets", post(rest::kill_active_sockets))
        .route("/api/tree/getProject", get(rest::get_project))
}
