//! Rooms: named groups of connections for fan-out.

pub mod entry;
pub mod handle;
pub mod membership;
pub mod router;

pub use handle::Room;
pub use router::{BroadcastReport, RoomRouter};
