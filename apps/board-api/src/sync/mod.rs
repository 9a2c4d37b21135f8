//! The session synchronization core: one coordinator per room key, reached
//! through the registry, fanning out to every connected participant.

pub mod connection;
pub mod events;
pub mod registry;
pub mod room;
pub mod roster;
pub mod server;
pub mod timeline;
