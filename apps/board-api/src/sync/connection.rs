//! Per-connection state.

use std::sync::atomic::{AtomicU64, Ordering};

use super::roster::Role;

/// State for a single WebSocket connection, fixed at join time.
pub struct Connection {
    /// Unique connection identifier (`conn_` prefixed ULID).
    pub connection_id: String,
    /// Authenticated user ID (join-token `sub`).
    pub user_id: String,
    /// Display name shown in the roster.
    pub display_name: String,
    /// Role granted by the join token.
    pub role: Role,
    /// The room this connection joined.
    pub room_key: String,
    /// Monotonically increasing sequence number for dispatch events.
    seq: AtomicU64,
}

impl Connection {
    pub fn new(
        connection_id: String,
        user_id: String,
        display_name: String,
        role: Role,
        room_key: String,
    ) -> Self {
        Self {
            connection_id,
            user_id,
            display_name,
            role,
            room_key,
            seq: AtomicU64::new(0),
        }
    }

    /// Get the next sequence number for a dispatch event.
    pub fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::Relaxed) + 1
    }
}
