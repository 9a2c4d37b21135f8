//! Sync opcodes, event types, and wire-format messages.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::oracle::MoveDescriptor;

// ---------------------------------------------------------------------------
// Opcodes
// ---------------------------------------------------------------------------

pub const OP_DISPATCH: u8 = 0;
pub const OP_HEARTBEAT: u8 = 1;
pub const OP_JOIN: u8 = 2;
pub const OP_MOVE: u8 = 3;
pub const OP_NAV: u8 = 4;
pub const OP_AUTHORIZE: u8 = 5;
pub const OP_HEARTBEAT_ACK: u8 = 6;
pub const OP_LOAD: u8 = 7;

// ---------------------------------------------------------------------------
// Server → Client message
// ---------------------------------------------------------------------------

/// A message sent from the server to the client over WebSocket.
#[derive(Debug, Clone, Serialize)]
pub struct SyncMessage {
    pub op: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub t: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub s: Option<u64>,
    pub d: Value,
}

impl SyncMessage {
    /// Build a DISPATCH message (op=0).
    pub fn dispatch(event_name: &str, seq: u64, data: Value) -> Self {
        Self {
            op: OP_DISPATCH,
            t: Some(event_name.to_string()),
            s: Some(seq),
            d: data,
        }
    }

    /// Build a HEARTBEAT_ACK message (op=6).
    pub fn heartbeat_ack(seq: u64) -> Self {
        Self {
            op: OP_HEARTBEAT_ACK,
            t: None,
            s: None,
            d: serde_json::json!({ "ack": seq }),
        }
    }
}

// ---------------------------------------------------------------------------
// Client → Server message
// ---------------------------------------------------------------------------

/// A message received from the client over WebSocket.
#[derive(Debug, Deserialize)]
pub struct ClientMessage {
    pub op: u8,
    #[serde(default)]
    pub d: Value,
}

// ---------------------------------------------------------------------------
// Client payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct JoinPayload {
    pub room_key: String,
    pub token: String,
    /// Optional explicit starting position for a room created by this join.
    /// Ignored when the room already exists.
    #[serde(default)]
    pub start_position: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct MovePayload {
    pub from_index: usize,
    pub mv: MoveDescriptor,
}

#[derive(Debug, Deserialize)]
pub struct NavPayload {
    pub target_index: usize,
}

#[derive(Debug, Deserialize)]
pub struct AuthorizePayload {
    pub target_connection_id: String,
    pub grant: bool,
}

#[derive(Debug, Deserialize)]
pub struct LoadPayload {
    pub text: String,
}

#[derive(Debug, Deserialize)]
pub struct HeartbeatPayload {
    #[serde(default)]
    pub seq: u64,
}

// ---------------------------------------------------------------------------
// Dispatch event types
// ---------------------------------------------------------------------------

/// Event names dispatched to clients.
pub struct EventName;

impl EventName {
    pub const BOOTSTRAP: &'static str = "BOOTSTRAP";
    pub const ROSTER_UPDATE: &'static str = "ROSTER_UPDATE";
    pub const MOVE_APPLIED: &'static str = "MOVE_APPLIED";
    pub const MOVE_REJECTED: &'static str = "MOVE_REJECTED";
    pub const NAV_APPLIED: &'static str = "NAV_APPLIED";
    pub const TIMELINE_LOADED: &'static str = "TIMELINE_LOADED";
    pub const REQUEST_REJECTED: &'static str = "REQUEST_REJECTED";
}

// ---------------------------------------------------------------------------
// Close codes (4000-range for application-level)
// ---------------------------------------------------------------------------

pub const CLOSE_UNKNOWN_ERROR: u16 = 4000;
pub const CLOSE_UNKNOWN_OPCODE: u16 = 4001;
pub const CLOSE_NOT_AUTHENTICATED: u16 = 4003;
pub const CLOSE_AUTH_FAILED: u16 = 4004;
pub const CLOSE_SESSION_TIMEOUT: u16 = 4009;
