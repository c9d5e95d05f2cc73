use std::error::Error;
use std::fmt::{Display, Formatter};

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use redis::RedisError;
use serde_json::json;

#[derive(Debug, Clone, PartialEq)]
pub enum RelayError {
    CannotDeleteActive(String),
    ProjectNotFound(String),
    NotAuthorized(String),
    KvError(String),
    StoreError(String),
    MalformedFrame(String),
    EventDecodeError(String),
    JsonError(String),
    GeohashError(String),
    InvalidCoordinates(f64, f64),
    SocketClosed,
    SocketSendError(String),
    SnapshotError(String),
    SocketBindError(String),
    TransportError(String),
    TracingInitError(String),
}

impl Error for RelayError {}

impl Display for RelayError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            RelayError::CannotDeleteActive(id) => {
                write!(f, "Project {id} is active and may not be deleted")
            }
            RelayError::ProjectNotFound(id) => write!(f, "No project with id {id}"),
            RelayError::NotAuthorized(msg) => write!(f, "Not authorized: {msg}"),
            RelayError::KvError(msg) => write!(f, "KV registry operation failed: {msg}"),
            RelayError::StoreError(msg) => write!(f, "Project store operation failed: {msg}"),
            RelayError::MalformedFrame(msg) => write!(f, "Malformed frame: {msg}"),
            RelayError::EventDecodeError(msg) => write!(f, "Could not decode event: {msg}"),
            RelayError::JsonError(msg) => write!(f, "{msg}"),
            RelayError::GeohashError(msg) => write!(f, "Geohash encoding failed: {msg}"),
            RelayError::InvalidCoordinates(lat, lng) => {
                write!(f, "Coordinates out of range: ({lat}, {lng})")
            }
            RelayError::SocketClosed => write!(f, "Socket closed"),
            RelayError::SocketSendError(msg) => write!(f, "Failed to write to socket: {msg}"),
            RelayError::SnapshotError(msg) => write!(f, "Snapshot query failed: {msg}"),
            RelayError::SocketBindError(msg) => write!(f, "Failed to bind server socket: {msg}"),
            RelayError::TransportError(msg) => write!(f, "Transport failure: {msg}"),
            RelayError::TracingInitError(msg) => write!(f, "{msg}"),
        }
    }
}

impl RelayError {
    /// Stable machine-readable code, used in `error` frames and REST bodies.
    pub fn code(&self) -> &'static str {
        match self {
            RelayError::CannotDeleteActive(_) => "cannot-delete-active",
            RelayError::ProjectNotFound(_) => "project-not-found",
            RelayError::NotAuthorized(_) => "not-authorized",
            RelayError::KvError(_) => "kv-error",
            RelayError::StoreError(_) => "store-error",
            RelayError::MalformedFrame(_) => "malformed-frame",
            RelayError::EventDecodeError(_) => "event-decode-error",
            RelayError::JsonError(_) => "json-error",
            RelayError::GeohashError(_) => "geohash-error",
            RelayError::InvalidCoordinates(_, _) => "invalid-coordinates",
            RelayError::SocketClosed => "socket-closed",
            RelayError::SocketSendError(_) => "socket-send-error",
            RelayError::SnapshotError(_) => "snapshot-error",
            RelayError::SocketBindError(_) => "socket-bind-error",
            RelayError::TransportError(_) => "transport-error",
            RelayError::TracingInitError(_) => "tracing-init-error",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            RelayError::CannotDeleteActive(_) => StatusCode::CONFLICT,
            RelayError::ProjectNotFound(_) => StatusCode::NOT_FOUND,
            RelayError::NotAuthorized(_) => StatusCode::FORBIDDEN,
            RelayError::MalformedFrame(_)
            | RelayError::EventDecodeError(_)
            | RelayError::InvalidCoordinates(_, _) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Business errors are surfaced to the originating socket; everything else
    /// is an operational failure that only gets logged.
    pub fn is_business_error(&self) -> bool {
        matches!(
            self,
            RelayError::CannotDeleteActive(_)
                | RelayError::ProjectNotFound(_)
                | RelayError::NotAuthorized(_)
                | RelayError::InvalidCoordinates(_, _)
        )
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(json!({
            "error": self.code(),
            "message": self.to_string(),
        }));
        (status, body).into_response()
    }
}

impl From<RedisError> for RelayError {
    fn from(err: RedisError) -> Self {
        RelayError::KvError(format!("Error talking to Redis: {err}"))
    }
}

impl From<serde_json::Error> for RelayError {
    fn from(err: serde_json::Error) -> Self {
        RelayError::JsonError(err.to_string())
    }
}

impl From<geohash::GeohashError> for RelayError {
    fn from(err: geohash::GeohashError) -> Self {
        RelayError::GeohashError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    #[test_case(RelayError::CannotDeleteActive("p1".into()), StatusCode::CONFLICT, true)]
    #[test_case(RelayError::ProjectNotFound("p9".into()), StatusCode::NOT_FOUND, true)]
    #[test_case(RelayError::NotAuthorized("not the creator".into()), StatusCode::FORBIDDEN, true)]
    #[test_case(RelayError::MalformedFrame("binary".into()), StatusCode::BAD_REQUEST, false)]
    #[test_case(RelayError::KvError("timeout".into()), StatusCode::INTERNAL_SERVER_ERROR, false)]
    fn maps_errors_to_status_and_visibility(err: RelayError, status: StatusCode, business: bool) {
        assert_eq!(err.status_code(), status);
        assert_eq!(err.is_business_error(), business);
    }
}
