pub mod connections;
pub mod fanout;
pub mod heartbeat;

pub use connections::{ConnectionRegistry, DEFAULT_OUTBOUND_CAPACITY};
pub use fanout::FanoutEngine;
pub use heartbeat::spawn_heartbeat;
