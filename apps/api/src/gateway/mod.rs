//! The realtime gateway: connection registry, room membership, presence,
//! message fan-out, chunked uploads, and call signaling.

pub mod calls;
pub mod events;
pub mod fanout;
pub mod presence;
pub mod registry;
pub mod rooms;
pub mod server;
pub mod transfer;
