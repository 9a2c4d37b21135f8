use std::fmt;

/// Errors produced by session operations.
///
/// Every variant leaves room state untouched; rejections are reported to the
/// requester only and are never fatal to the room itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// The requester's role/control does not permit the attempted operation.
    Unauthorized(&'static str),
    /// An index fell outside `[0, len(timeline))`.
    BadIndex { index: usize, len: usize },
    /// The oracle refused the move (distinct from `Unauthorized` so clients
    /// can render "illegal move" vs "you can't move now").
    IllegalMove(String),
    /// The oracle could not be reached or failed internally.
    OracleUnavailable(String),
    /// The requester is not in the roster (stale connection id).
    UnknownParticipant,
    /// The room emptied and is being evicted; joins must retry through the
    /// registry. Never surfaced to clients.
    RoomClosed,
}

impl SyncError {
    /// Stable machine-readable code sent in rejection payloads.
    pub fn code(&self) -> &'static str {
        match self {
            SyncError::Unauthorized(_) => "unauthorized",
            SyncError::BadIndex { .. } => "bad_index",
            SyncError::IllegalMove(_) => "illegal_move",
            SyncError::OracleUnavailable(_) => "oracle_unavailable",
            SyncError::UnknownParticipant => "unknown_participant",
            SyncError::RoomClosed => "room_closed",
        }
    }
}

impl fmt::Display for SyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncError::Unauthorized(what) => write!(f, "not authorized to {what}"),
            SyncError::BadIndex { index, len } => {
                write!(f, "index {index} out of range for timeline of length {len}")
            }
            SyncError::IllegalMove(reason) => write!(f, "illegal move: {reason}"),
            SyncError::OracleUnavailable(reason) => write!(f, "oracle unavailable: {reason}"),
            SyncError::UnknownParticipant => write!(f, "connection is not in the roster"),
            SyncError::RoomClosed => write!(f, "room is closed"),
        }
    }
}

impl std::error::Error for SyncError {}
