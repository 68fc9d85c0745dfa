//! The room server: per-room state plus the room registry.

pub mod manager;
pub mod room;

pub use manager::RoomManager;
pub use room::{Connection, Room};
