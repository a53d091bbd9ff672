//! WebSocket module for real-time fan-out

pub mod events;
pub mod handler;

pub use events::{ConnectionId, Room, RoomRegistry};
pub use handler::ws_handler;
