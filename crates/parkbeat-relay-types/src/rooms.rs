use std::fmt;
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::SocketId;

/// Key prefix for every relay key in the shared KV store.
pub const KV_PREFIX: &str = "parkbeat";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoomKind {
    Geohash,
    Project,
}

/// A named fan-out bucket. The `geohash:<prefix>` / `project:<id>` strings are
/// the wire and KV format; in process a room is this two-field record.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Room {
    pub kind: RoomKind,
    pub key: String,
}

impl Room {
    pub fn geohash(prefix: impl Into<String>) -> Self {
        Room {
            kind: RoomKind::Geohash,
            key: prefix.into(),
        }
    }

    pub fn project(id: impl Into<String>) -> Self {
        Room {
            kind: RoomKind::Project,
            key: id.into(),
        }
    }

    /// Parses the wire form, e.g. `geohash:dr5ru` or `project:p1`.
    pub fn parse(name: &str) -> Option<Room> {
        let (kind, key) = name.split_once(':')?;
        if key.is_empty() {
            return None;
        }
        match kind {
            "geohash" => Some(Room::geohash(key)),
            "project" => Some(Room::project(key)),
            _ => None,
        }
    }

    /// KV hash holding `{socket_id -> last_seen_ms}` for this room.
    pub fn sockets_key(&self) -> String {
        format!("{KV_PREFIX}:{self}:sockets")
    }
}

impl Display for Room {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self.kind {
            RoomKind::Geohash => write!(f, "geohash:{}", self.key),
            RoomKind::Project => write!(f, "project:{}", self.key),
        }
    }
}

impl Serialize for Room {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Room {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Room::parse(&raw)
            .ok_or_else(|| serde::de::Error::custom(format!("not a room name: {raw}")))
    }
}

/// KV set of geohash prefixes a socket is subscribed to (reverse index).
pub fn socket_geohashes_key(socket_id: &SocketId) -> String {
    format!("{KV_PREFIX}:sockets:{socket_id}:geohashes")
}

/// KV set of project ids a socket is subscribed to (reverse index).
pub fn socket_projects_key(socket_id: &SocketId) -> String {
    format!("{KV_PREFIX}:sockets:{socket_id}:projects")
}

/// KV hash of `{socket_id -> json(CleanupQueueEntry)}` shared by all instances.
pub fn cleanup_queue_key() -> String {
    format!("{KV_PREFIX}:cleanupQueue")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupQueueEntry {
    pub enqueued_at: i64,
    pub scope: Vec<RoomKind>,
}

impl CleanupQueueEntry {
    pub fn full(enqueued_at: i64) -> Self {
        CleanupQueueEntry {
            enqueued_at,
            scope: vec![RoomKind::Geohash, RoomKind::Project],
        }
    }
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    #[test_case("geohash:dr5ru", Some(RoomKind::Geohash), "dr5ru"; "geohash room")]
    #[test_case("project:p1", Some(RoomKind::Project), "p1"; "project room")]
    #[test_case("project:with:colon", Some(RoomKind::Project), "with:colon"; "key may contain separator")]
    #[test_case("geohash:", None, ""; "empty key rejected")]
    #[test_case("weather:nyc", None, ""; "unknown namespace rejected")]
    #[test_case("noseparator", None, ""; "missing separator rejected")]
    fn parses_room_names(raw: &str, kind: Option<RoomKind>, key: &str) {
        let parsed = Room::parse(raw);
        match kind {
            Some(kind) => {
                let room = parsed.expect("should parse");
                assert_eq!(room.kind, kind);
                assert_eq!(room.key, key);
                assert_eq!(room.to_string(), raw);
            }
            None => assert!(parsed.is_none()),
        }
    }

    #[test]
    fn kv_keys_follow_schema() {
        let socket = SocketId::from("01JX");
        assert_eq!(
            Room::geohash("dr5ru").sockets_key(),
            "parkbeat:geohash:dr5ru:sockets"
        );
        assert_eq!(
            Room::project("p1").sockets_key(),
            "parkbeat:project:p1:sockets"
        );
        assert_eq!(socket_geohashes_key(&socket), "parkbeat:sockets:01JX:geohashes");
        assert_eq!(socket_projects_key(&socket), "parkbeat:sockets:01JX:projects");
        assert_eq!(cleanup_queue_key(), "parkbeat:cleanupQueue");
    }

    #[test]
    fn cleanup_entry_round_trips_as_json() {
        let entry = CleanupQueueEntry::full(1_700_000_000_000);
        let raw = serde_json::to_string(&entry).unwrap();
        assert_eq!(raw, r#"{"enqueuedAt":1700000000000,"scope":["geohash","project"]}"#);
        let back: CleanupQueueEntry = serde_json::from_str(&raw).unwrap();
        assert_eq!(back, entry);
    }
}
