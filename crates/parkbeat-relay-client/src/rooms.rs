use std::collections::HashMap;
use std::time::Duration;

use parkbeat_relay_types::events::ClientEvent;
use parkbeat_relay_types::rooms::Room;
use tokio::time::Instant;

pub const UNSUBSCRIBE_LINGER: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomStatus {
    Active,
    /// Kept around briefly after an unsubscribe so the UI can show the room
    /// as "recently left" without tearing widgets down.
    RecentlyUnsubscribed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RoomEntry {
    pub room: Room,
    pub status: RoomStatus,
}

#[derive(Debug, Clone, Copy)]
enum TrackedStatus {
    Active,
    Unsubscribed(Instant),
}

/// Client-side mirror of the server's subscription map.
#[derive(Debug, Default)]
pub struct RoomBook {
    rooms: HashMap<Room, TrackedStatus>,
    linger: Option<Duration>,
}

impl RoomBook {
    pub fn with_linger(linger: Duration) -> Self {
        RoomBook {
            rooms: HashMap::new(),
            linger: Some(linger),
        }
    }

    fn linger(&self) -> Duration {
        self.linger.unwrap_or(UNSUBSCRIBE_LINGER)
    }

    /// Follows subscription emits; other events leave the book untouched.
    pub fn observe(&mut self, event: &ClientEvent) {
        let (room, should_subscribe) = match event {
            ClientEvent::Subscribe(req) => (Room::geohash(&req.geohash), req.should_subscribe),
            ClientEvent::SubscribeProject(req) => {
                (Room::project(&req.project_id), req.should_subscribe)
            }
            _ => return,
        };
        if should_subscribe {
            self.rooms.insert(room, TrackedStatus::Active);
        } else {
            self.rooms
                .insert(room, TrackedStatus::Unsubscribed(Instant::now()));
        }
    }

    /// Rooms the manager knows about, with expired linger entries pruned.
    pub fn entries(&mut self) -> Vec<RoomEntry> {
        let linger = self.linger();
        let now = Instant::now();
        self.rooms.retain(|_, status| match status {
            TrackedStatus::Active => true,
            TrackedStatus::Unsubscribed(since) => now.duration_since(*since) < linger,
        });
        let mut entries: Vec<RoomEntry> = self
            .rooms
            .iter()
            .map(|(room, status)| RoomEntry {
                room: room.clone(),
                status: match status {
                    TrackedStatus::Active => RoomStatus::Active,
                    TrackedStatus::Unsubscribed(_) => RoomStatus::RecentlyUnsubscribed,
                },
            })
            .collect();
        entries.sort_by_key(|entry| entry.room.to_string());
        entries
    }

    /// Active rooms only, for re-subscribing after a reconnect.
    pub fn active_rooms(&self) -> Vec<Room> {
        self.rooms
            .iter()
            .filter_map(|(room, status)| match status {
                TrackedStatus::Active => Some(room.clone()),
                TrackedStatus::Unsubscribed(_) => None,
            })
            .collect()
    }
}
