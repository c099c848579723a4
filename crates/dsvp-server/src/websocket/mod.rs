//! Worker sockets: connection state, registry, heartbeat, and the per-socket task.

pub mod connection;
pub mod handler;
pub mod heartbeat;
pub mod registry;
