use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::errors::RelayError;
use crate::rooms::Room;
use crate::{
    ContributionDraft, Project, ProjectCluster, ProjectDraft, ProjectSnapshot, RelayResult,
    SocketId,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeRequest {
    pub geohash: String,
    pub should_subscribe: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeProjectRequest {
    pub project_id: String,
    pub should_subscribe: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteProjectRequest {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidateImageRequest {
    pub project_id: String,
    pub fundraiser_id: String,
    pub request_id: String,
    pub image_source: String,
}

/// Client → server vocabulary. The wire frame is `{"event": kind, "data": payload}`
/// or the two-element array `[kind, payload]`; see [`decode_client_frame`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ClientEvent {
    Ping,
    Subscribe(SubscribeRequest),
    SubscribeProject(SubscribeProjectRequest),
    SetProject(ProjectDraft),
    DeleteProject(DeleteProjectRequest),
    AddContribution(ContributionDraft),
    ValidateImage(ValidateImageRequest),
}

impl ClientEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            ClientEvent::Ping => "ping",
            ClientEvent::Subscribe(_) => "subscribe",
            ClientEvent::SubscribeProject(_) => "subscribeProject",
            ClientEvent::SetProject(_) => "setProject",
            ClientEvent::DeleteProject(_) => "deleteProject",
            ClientEvent::AddContribution(_) => "addContribution",
            ClientEvent::ValidateImage(_) => "validateImage",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatFrame {
    pub room: Room,
    pub last_ping_time: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeohashRef {
    pub geohash: String,
}

/// The `subscribe` snapshot tuple: `[{geohash}, projects[], groups[]]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscribeSnapshot(
    pub GeohashRef,
    pub Vec<Project>,
    pub Vec<ProjectCluster>,
);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectDataFrame {
    pub project_id: String,
    pub data: ProjectSnapshot,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageValidationResult {
    pub project_id: String,
    pub fundraiser_id: String,
    pub request_id: String,
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorFrame {
    pub code: String,
    pub message: String,
}

impl From<&RelayError> for ErrorFrame {
    fn from(err: &RelayError) -> Self {
        ErrorFrame {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

/// Server → client vocabulary. Payloads of the async analysis jobs are opaque
/// to the relay and pass through as raw JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ServerEvent {
    Pong,
    ProvideSocketId(SocketId),
    Heartbeat(HeartbeatFrame),
    NewProject(Project),
    DeleteProject(DeleteProjectRequest),
    Subscribe(SubscribeSnapshot),
    ProjectData(ProjectDataFrame),
    ImageValidation(ImageValidationResult),
    ImageAnalysis(Value),
    ProjectVision(Value),
    CostEstimate(Value),
    Error(ErrorFrame),
}

impl ServerEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            ServerEvent::Pong => "pong",
            ServerEvent::ProvideSocketId(_) => "provideSocketId",
            ServerEvent::Heartbeat(_) => "heartbeat",
            ServerEvent::NewProject(_) => "newProject",
            ServerEvent::DeleteProject(_) => "deleteProject",
            ServerEvent::Subscribe(_) => "subscribe",
            ServerEvent::ProjectData(_) => "projectData",
            ServerEvent::ImageValidation(_) => "imageValidation",
            ServerEvent::ImageAnalysis(_) => "imageAnalysis",
            ServerEvent::ProjectVision(_) => "projectVision",
            ServerEvent::CostEstimate(_) => "costEstimate",
            ServerEvent::Error(_) => "error",
        }
    }

    /// Heartbeats are droppable under backpressure; everything else blocks.
    pub fn is_droppable(&self) -> bool {
        matches!(self, ServerEvent::Heartbeat(_) | ServerEvent::Pong)
    }
}

/// Payload-free tags of the S2C vocabulary, used as hook-bus keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServerEventKind {
    Pong,
    ProvideSocketId,
    Heartbeat,
    NewProject,
    DeleteProject,
    Subscribe,
    ProjectData,
    ImageValidation,
    ImageAnalysis,
    ProjectVision,
    CostEstimate,
    Error,
}

impl From<&ServerEvent> for ServerEventKind {
    fn from(event: &ServerEvent) -> Self {
        match event {
            ServerEvent::Pong => ServerEventKind::Pong,
            ServerEvent::ProvideSocketId(_) => ServerEventKind::ProvideSocketId,
            ServerEvent::Heartbeat(_) => ServerEventKind::Heartbeat,
            ServerEvent::NewProject(_) => ServerEventKind::NewProject,
            ServerEvent::DeleteProject(_) => ServerEventKind::DeleteProject,
            ServerEvent::Subscribe(_) => ServerEventKind::Subscribe,
            ServerEvent::ProjectData(_) => ServerEventKind::ProjectData,
            ServerEvent::ImageValidation(_) => ServerEventKind::ImageValidation,
            ServerEvent::ImageAnalysis(_) => ServerEventKind::ImageAnalysis,
            ServerEvent::ProjectVision(_) => ServerEventKind::ProjectVision,
            ServerEvent::CostEstimate(_) => ServerEventKind::CostEstimate,
            ServerEvent::Error(_) => ServerEventKind::Error,
        }
    }
}

/// Normalizes either frame shape into the tagged object form and decodes it.
/// Unknown kinds and schema mismatches come back as [`RelayError::EventDecodeError`]
/// so the caller can log and drop the frame.
pub fn decode_client_frame(text: &str) -> RelayResult<ClientEvent> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| RelayError::MalformedFrame(e.to_string()))?;
    let normalized = normalize_frame(value)?;
    serde_json::from_value(normalized).map_err(|e| RelayError::EventDecodeError(e.to_string()))
}

/// Same normalization for server frames, used by the client connection manager.
pub fn decode_server_frame(text: &str) -> RelayResult<ServerEvent> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| RelayError::MalformedFrame(e.to_string()))?;
    let normalized = normalize_frame(value)?;
    serde_json::from_value(normalized).map_err(|e| RelayError::EventDecodeError(e.to_string()))
}

pub fn encode_server_frame(event: &ServerEvent) -> RelayResult<String> {
    serde_json::to_string(event).map_err(RelayError::from)
}

pub fn encode_client_frame(event: &ClientEvent) -> RelayResult<String> {
    serde_json::to_string(event).map_err(RelayError::from)
}

fn normalize_frame(value: Value) -> RelayResult<Value> {
    match value {
        Value::Array(parts) => {
            let mut parts = parts.into_iter();
            match (parts.next(), parts.next(), parts.next()) {
                (Some(kind @ Value::String(_)), Some(payload), None) => {
                    Ok(json!({"event": kind, "data": payload}))
                }
                _ => Err(RelayError::MalformedFrame(
                    "array frames must be [kind, payload]".into(),
                )),
            }
        }
        Value::Object(mut fields) => {
            // A null payload is the same as an absent one; unit events come in both ways.
            if fields.get("data").is_some_and(Value::is_null) {
                fields.remove("data");
            }
            Ok(Value::Object(fields))
        }
        other => Err(RelayError::MalformedFrame(format!(
            "expected object or array frame, got {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn decodes_object_frames() {
        let event = decode_client_frame(
            r#"{"event":"subscribe","data":{"geohash":"dr5ru","shouldSubscribe":true}}"#,
        )
        .unwrap();
        assert_eq!(
            event,
            ClientEvent::Subscribe(SubscribeRequest {
                geohash: "dr5ru".into(),
                should_subscribe: true,
            })
        );
    }

    #[test]
    fn decodes_array_frames() {
        let event = decode_client_frame(
            r#"["subscribeProject",{"projectId":"p1","shouldSubscribe":false}]"#,
        )
        .unwrap();
        assert_eq!(
            event,
            ClientEvent::SubscribeProject(SubscribeProjectRequest {
                project_id: "p1".into(),
                should_subscribe: false,
            })
        );
    }

    #[test]
    fn decodes_contribution_frames_without_timestamps() {
        use crate::{ContributionDraft, ContributionKind};

        let event = decode_client_frame(
            r#"{"event":"addContribution","data":{"id":"c1","projectId":"p1","userId":"ben","kind":"funding","amountCents":2500}}"#,
        )
        .unwrap();
        assert_eq!(
            event,
            ClientEvent::AddContribution(ContributionDraft {
                id: "c1".into(),
                project_id: "p1".into(),
                user_id: "ben".into(),
                kind: ContributionKind::Funding,
                amount_cents: Some(2500),
                message: None,
            })
        );
    }

    #[test]
    fn decodes_ping_with_and_without_payload() {
        assert_eq!(
            decode_client_frame(r#"{"event":"ping"}"#).unwrap(),
            ClientEvent::Ping
        );
        assert_eq!(
            decode_client_frame(r#"{"event":"ping","data":null}"#).unwrap(),
            ClientEvent::Ping
        );
    }

    #[test]
    fn unknown_kind_is_a_decode_error() {
        let err = decode_client_frame(r#"{"event":"teleport","data":{}}"#).unwrap_err();
        assert!(matches!(err, RelayError::EventDecodeError(_)));
    }

    #[test]
    fn payload_schema_mismatch_is_a_decode_error() {
        let err = decode_client_frame(r#"{"event":"subscribe","data":{"geohash":7}}"#).unwrap_err();
        assert!(matches!(err, RelayError::EventDecodeError(_)));
    }

    #[test]
    fn non_json_is_malformed() {
        let err = decode_client_frame("not json at all").unwrap_err();
        assert!(matches!(err, RelayError::MalformedFrame(_)));
    }

    #[test]
    fn server_frames_use_the_object_shape() {
        let frame = encode_server_frame(&ServerEvent::Heartbeat(HeartbeatFrame {
            room: Room::geohash("dr5ru"),
            last_ping_time: 1_700_000_000_000,
        }))
        .unwrap();
        assert_eq!(
            frame,
            r#"{"event":"heartbeat","data":{"room":"geohash:dr5ru","lastPingTime":1700000000000}}"#
        );
    }

    #[test]
    fn snapshot_tuple_serializes_as_array() {
        let snapshot = SubscribeSnapshot(
            GeohashRef {
                geohash: "dr5ru".into(),
            },
            vec![],
            vec![],
        );
        let raw = serde_json::to_string(&ServerEvent::Subscribe(snapshot)).unwrap();
        assert_eq!(
            raw,
            r#"{"event":"subscribe","data":[{"geohash":"dr5ru"},[],[]]}"#
        );
    }

    #[test]
    fn server_frame_round_trips_through_client_decoder() {
        let event = ServerEvent::ProvideSocketId(SocketId::from("01JLIVE"));
        let raw = encode_server_frame(&event).unwrap();
        assert_eq!(decode_server_frame(&raw).unwrap(), event);
    }
}
