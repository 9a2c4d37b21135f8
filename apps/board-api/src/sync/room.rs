//! Session coordinator: one room's timeline, cursor, roster, and fan-out.
//!
//! Every operation locks the room's single `tokio::sync::Mutex`, so all
//! mutations of one room are linearized and every participant observes
//! commits in the same order. Fan-out under the lock is fire-and-forget
//! sends into per-connection unbounded outboxes; a stalled socket only ever
//! stalls its own connection's drain loop.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::{json, Value};
use tokio::sync::{mpsc, Mutex};

use crate::error::SyncError;
use crate::oracle::{MoveDescriptor, OracleError, Position, PositionOracle};

use super::events::EventName;
use super::roster::{Participant, Roster};
use super::server::HEARTBEAT_INTERVAL_MS;
use super::timeline::Timeline;

/// An event queued for one connection. The connection's event loop assigns
/// the dispatch sequence number as it drains its outbox.
#[derive(Debug, Clone)]
pub struct Outbound {
    pub event: &'static str,
    pub data: Value,
}

/// Sender half of a connection's outbox.
pub type Outbox = mpsc::UnboundedSender<Outbound>;

/// Mutable session state, owned exclusively by the room's mutex.
struct RoomState {
    timeline: Timeline,
    cursor: usize,
    roster: Roster,
    outboxes: HashMap<String, Outbox>,
}

/// One synchronized session. Created by the registry on first join, evicted
/// once the roster empties.
pub struct Room {
    pub key: String,
    /// Set when the roster empties. A closed room refuses joins; the
    /// registry drops it and re-creates a fresh one for the key.
    closed: AtomicBool,
    oracle: Arc<dyn PositionOracle>,
    state: Mutex<RoomState>,
}

impl Room {
    pub fn new(key: String, start: Position, oracle: Arc<dyn PositionOracle>) -> Self {
        Self {
            key,
            closed: AtomicBool::new(false),
            oracle,
            state: Mutex::new(RoomState {
                timeline: Timeline::new(start),
                cursor: 0,
                roster: Roster::new(),
                outboxes: HashMap::new(),
            }),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Add a participant and hand them the bootstrap snapshot.
    ///
    /// Snapshot capture and outbox registration happen under one lock
    /// acquisition: every commit is either in the snapshot or queued behind
    /// it in the outbox, with no gap a concurrent mutation could fall into.
    pub async fn join(&self, participant: Participant, outbox: Outbox) -> Result<(), SyncError> {
        let mut st = self.state.lock().await;
        if self.is_closed() {
            return Err(SyncError::RoomClosed);
        }

        let connection_id = participant.connection_id.clone();
        st.roster.insert(participant);
        st.outboxes.insert(connection_id.clone(), outbox);

        let bootstrap = json!({
            "connection_id": connection_id,
            "room_key": self.key,
            "timeline": st.timeline.positions(),
            "cursor": st.cursor,
            "move_log": st.timeline.move_pairs(),
            "roster": roster_json(&st.roster),
            "heartbeat_interval": HEARTBEAT_INTERVAL_MS,
        });
        send_to(&st, &connection_id, EventName::BOOTSTRAP, bootstrap);
        broadcast_except(
            &st,
            &connection_id,
            EventName::ROSTER_UPDATE,
            json!({ "roster": roster_json(&st.roster) }),
        );
        Ok(())
    }

    /// Remove a participant. Returns `true` if the roster is now empty and
    /// the room has closed itself (the caller evicts it from the registry).
    pub async fn leave(&self, connection_id: &str) -> bool {
        let mut st = self.state.lock().await;
        st.outboxes.remove(connection_id);
        if st.roster.remove(connection_id).is_none() {
            return false;
        }

        if st.roster.is_empty() {
            self.closed.store(true, Ordering::Release);
            return true;
        }

        broadcast(
            &st,
            EventName::ROSTER_UPDATE,
            json!({ "roster": roster_json(&st.roster) }),
        );
        false
    }

    /// Owner-only: grant or revoke an observer's delegated move authority.
    pub async fn authorize(
        &self,
        requester: &str,
        target: &str,
        grant: bool,
    ) -> Result<(), SyncError> {
        let mut st = self.state.lock().await;
        if st.roster.get(requester).is_none() {
            return Err(SyncError::UnknownParticipant);
        }
        if !st.roster.is_owner(requester) {
            return Err(SyncError::Unauthorized("grant control"));
        }
        if !st.roster.set_control(target, grant) {
            return Err(SyncError::UnknownParticipant);
        }

        broadcast(
            &st,
            EventName::ROSTER_UPDATE,
            json!({ "roster": roster_json(&st.roster) }),
        );
        Ok(())
    }

    /// Apply a move from `from_index`, truncating any later positions.
    ///
    /// The oracle consult happens inside the serialization domain because
    /// validate-and-apply is one atomic step; only the requesting room waits
    /// on it, and participant fan-out stays non-blocking.
    pub async fn apply_move(
        &self,
        requester: &str,
        from_index: usize,
        mv: &MoveDescriptor,
    ) -> Result<(), SyncError> {
        let mut st = self.state.lock().await;
        if st.roster.get(requester).is_none() {
            return Err(SyncError::UnknownParticipant);
        }
        if !st.roster.can_move(requester) {
            return Err(SyncError::Unauthorized("move"));
        }

        let len = st.timeline.len();
        let base = st
            .timeline
            .position(from_index)
            .ok_or(SyncError::BadIndex {
                index: from_index,
                len,
            })?
            .clone();

        let applied = match self.oracle.apply_move(&base, mv).await {
            Ok(applied) => applied,
            Err(OracleError::Rejected(reason)) => return Err(SyncError::IllegalMove(reason)),
            Err(OracleError::Unavailable(reason)) => {
                tracing::warn!(room_key = %self.key, %reason, "oracle unavailable");
                return Err(SyncError::OracleUnavailable(reason));
            }
        };

        let tip = st
            .timeline
            .branch(from_index, applied.position.clone(), applied.notation.clone());
        st.cursor = tip;

        broadcast(
            &st,
            EventName::MOVE_APPLIED,
            json!({
                "from_index": from_index,
                "position": applied.position,
                "notation": applied.notation,
                "cursor": st.cursor,
                "move_log_tail": st.timeline.last_pair(),
            }),
        );
        Ok(())
    }

    /// Owner-only: steer everyone's view to `target_index`. Never touches
    /// the timeline or the move log.
    pub async fn navigate(&self, requester: &str, target_index: usize) -> Result<(), SyncError> {
        let mut st = self.state.lock().await;
        if st.roster.get(requester).is_none() {
            return Err(SyncError::UnknownParticipant);
        }
        if !st.roster.is_owner(requester) {
            return Err(SyncError::Unauthorized("navigate"));
        }
        if target_index >= st.timeline.len() {
            return Err(SyncError::BadIndex {
                index: target_index,
                len: st.timeline.len(),
            });
        }

        st.cursor = target_index;
        broadcast(&st, EventName::NAV_APPLIED, json!({ "cursor": st.cursor }));
        Ok(())
    }

    /// Owner-only: replace the board with a prepared notation sequence.
    pub async fn load(&self, requester: &str, text: &str) -> Result<(), SyncError> {
        let mut st = self.state.lock().await;
        if st.roster.get(requester).is_none() {
            return Err(SyncError::UnknownParticipant);
        }
        if !st.roster.is_owner(requester) {
            return Err(SyncError::Unauthorized("load a game"));
        }

        let parsed = match self.oracle.parse_notation_sequence(text).await {
            Ok(parsed) => parsed,
            Err(OracleError::Rejected(reason)) => return Err(SyncError::IllegalMove(reason)),
            Err(OracleError::Unavailable(reason)) => {
                tracing::warn!(room_key = %self.key, %reason, "oracle unavailable");
                return Err(SyncError::OracleUnavailable(reason));
            }
        };
        if parsed.positions.is_empty() || parsed.positions.len() != parsed.notations.len() + 1 {
            return Err(SyncError::OracleUnavailable(
                "malformed parse result".to_string(),
            ));
        }

        st.timeline.replace(parsed.positions, parsed.notations);
        st.cursor = 0;

        broadcast(
            &st,
            EventName::TIMELINE_LOADED,
            json!({
                "timeline": st.timeline.positions(),
                "cursor": st.cursor,
                "move_log": st.timeline.move_pairs(),
            }),
        );
        Ok(())
    }
}

fn roster_json(roster: &Roster) -> Value {
    serde_json::to_value(roster.members()).unwrap_or_default()
}

/// Unicast to one connection. A closed outbox means the connection is gone;
/// the drop is final (reconnects re-join and bootstrap fresh).
fn send_to(st: &RoomState, connection_id: &str, event: &'static str, data: Value) {
    if let Some(tx) = st.outboxes.get(connection_id) {
        let _ = tx.send(Outbound { event, data });
    }
}

fn broadcast(st: &RoomState, event: &'static str, data: Value) {
    for tx in st.outboxes.values() {
        let _ = tx.send(Outbound {
            event,
            data: data.clone(),
        });
    }
}

fn broadcast_except(st: &RoomState, skip: &str, event: &'static str, data: Value) {
    for (connection_id, tx) in &st.outboxes {
        if connection_id == skip {
            continue;
        }
        let _ = tx.send(Outbound {
            event,
            data: data.clone(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::{AppliedMove, ParsedGame};
    use crate::sync::roster::Role;
    use async_trait::async_trait;
    use tokio::sync::mpsc::UnboundedReceiver;

    /// Scripted oracle: accepts any move except from-square "xx", chains the
    /// notation onto the position text so results are easy to assert on.
    struct FakeOracle;

    #[async_trait]
    impl PositionOracle for FakeOracle {
        async fn apply_move(
            &self,
            position: &Position,
            mv: &MoveDescriptor,
        ) -> Result<AppliedMove, OracleError> {
            if mv.from == "xx" {
                return Err(OracleError::Rejected("illegal move".to_string()));
            }
            let notation = format!("{}-{}", mv.from, mv.to);
            Ok(AppliedMove {
                position: Position::new(format!("{} {}", position.0, notation)),
                notation,
            })
        }

        async fn parse_notation_sequence(&self, text: &str) -> Result<ParsedGame, OracleError> {
            if text.is_empty() {
                return Err(OracleError::Rejected("empty movetext".to_string()));
            }
            Ok(ParsedGame {
                positions: vec![Position::new("L0"), Position::new("L1"), Position::new("L2")],
                notations: vec!["d4".to_string(), "d5".to_string()],
                headers: Default::default(),
            })
        }
    }

    fn test_room() -> Room {
        Room::new(
            "room_test".to_string(),
            Position::new("P0"),
            Arc::new(FakeOracle),
        )
    }

    fn mv(from: &str, to: &str) -> MoveDescriptor {
        MoveDescriptor {
            from: from.to_string(),
            to: to.to_string(),
            promotion: None,
        }
    }

    async fn join(room: &Room, conn: &str, role: Role) -> UnboundedReceiver<Outbound> {
        let (tx, rx) = mpsc::unbounded_channel();
        let participant = Participant::new(
            conn.to_string(),
            format!("usr_{conn}"),
            format!("User {conn}"),
            role,
        );
        room.join(participant, tx).await.unwrap();
        rx
    }

    fn drain(rx: &mut UnboundedReceiver<Outbound>) -> Vec<Outbound> {
        let mut out = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            out.push(ev);
        }
        out
    }

    #[tokio::test]
    async fn join_receives_bootstrap_first() {
        let room = test_room();
        let mut rx = join(&room, "c1", Role::Owner).await;

        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event, EventName::BOOTSTRAP);
        assert_eq!(events[0].data["timeline"], json!(["P0"]));
        assert_eq!(events[0].data["cursor"], 0);
        assert_eq!(events[0].data["move_log"], json!([]));
        assert_eq!(events[0].data["roster"][0]["connection_id"], "c1");
    }

    #[tokio::test]
    async fn bootstrap_contains_every_committed_move() {
        let room = test_room();
        let _owner_rx = join(&room, "c1", Role::Owner).await;
        room.apply_move("c1", 0, &mv("e2", "e4")).await.unwrap();

        // A join processed after the commit must see it in the snapshot.
        let mut rx = join(&room, "c2", Role::Observer).await;
        let events = drain(&mut rx);
        assert_eq!(events[0].event, EventName::BOOTSTRAP);
        assert_eq!(events[0].data["timeline"], json!(["P0", "P0 e2-e4"]));
        assert_eq!(events[0].data["cursor"], 1);
        assert_eq!(events[0].data["move_log"][0]["first"], "e2-e4");
    }

    #[tokio::test]
    async fn all_participants_observe_the_same_order() {
        let room = test_room();
        let mut rx1 = join(&room, "c1", Role::Owner).await;
        let mut rx2 = join(&room, "c2", Role::Observer).await;

        room.apply_move("c1", 0, &mv("e2", "e4")).await.unwrap();
        room.authorize("c1", "c2", true).await.unwrap();
        room.apply_move("c2", 1, &mv("e7", "e5")).await.unwrap();
        room.navigate("c1", 0).await.unwrap();

        let names = |evs: Vec<Outbound>| -> Vec<&'static str> {
            evs.into_iter()
                .map(|e| e.event)
                .filter(|e| *e != EventName::BOOTSTRAP && *e != EventName::ROSTER_UPDATE)
                .collect()
        };
        let order1 = names(drain(&mut rx1));
        let order2 = names(drain(&mut rx2));
        assert_eq!(
            order1,
            vec![
                EventName::MOVE_APPLIED,
                EventName::MOVE_APPLIED,
                EventName::NAV_APPLIED,
            ]
        );
        assert_eq!(order1, order2);
    }

    #[tokio::test]
    async fn observer_without_control_cannot_move() {
        let room = test_room();
        let _owner_rx = join(&room, "c1", Role::Owner).await;
        let _obs_rx = join(&room, "c2", Role::Observer).await;

        let err = room.apply_move("c2", 0, &mv("e2", "e4")).await.unwrap_err();
        assert_eq!(err, SyncError::Unauthorized("move"));

        // No mutation: a fresh join still sees the untouched board.
        let mut rx = join(&room, "probe", Role::Observer).await;
        let events = drain(&mut rx);
        assert_eq!(events[0].data["timeline"], json!(["P0"]));
        assert_eq!(events[0].data["move_log"], json!([]));
    }

    #[tokio::test]
    async fn granted_observer_can_move_until_revoked() {
        let room = test_room();
        let _owner_rx = join(&room, "c1", Role::Owner).await;
        let _obs_rx = join(&room, "c2", Role::Observer).await;

        room.authorize("c1", "c2", true).await.unwrap();
        room.apply_move("c2", 0, &mv("e2", "e4")).await.unwrap();

        room.authorize("c1", "c2", false).await.unwrap();
        let err = room.apply_move("c2", 1, &mv("e7", "e5")).await.unwrap_err();
        assert_eq!(err, SyncError::Unauthorized("move"));
    }

    #[tokio::test]
    async fn observer_cannot_grant_control() {
        let room = test_room();
        let _owner_rx = join(&room, "c1", Role::Owner).await;
        let _obs_rx = join(&room, "c2", Role::Observer).await;
        let _obs_rx3 = join(&room, "c3", Role::Observer).await;

        let err = room.authorize("c2", "c3", true).await.unwrap_err();
        assert_eq!(err, SyncError::Unauthorized("grant control"));
        assert!(room.apply_move("c3", 0, &mv("a2", "a3")).await.is_err());
    }

    #[tokio::test]
    async fn illegal_move_is_rejected_without_mutation() {
        let room = test_room();
        let mut rx = join(&room, "c1", Role::Owner).await;

        let err = room.apply_move("c1", 0, &mv("xx", "e4")).await.unwrap_err();
        assert_eq!(err, SyncError::IllegalMove("illegal move".to_string()));

        // Nothing was broadcast beyond the bootstrap.
        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event, EventName::BOOTSTRAP);
    }

    #[tokio::test]
    async fn move_from_out_of_range_index_is_rejected() {
        let room = test_room();
        let _rx = join(&room, "c1", Role::Owner).await;

        let err = room.apply_move("c1", 5, &mv("e2", "e4")).await.unwrap_err();
        assert_eq!(err, SyncError::BadIndex { index: 5, len: 1 });
    }

    #[tokio::test]
    async fn move_from_earlier_index_truncates_for_everyone() {
        let room = test_room();
        let mut rx = join(&room, "c1", Role::Owner).await;

        room.apply_move("c1", 0, &mv("e2", "e4")).await.unwrap();
        room.apply_move("c1", 1, &mv("e7", "e5")).await.unwrap();
        // Branch from the start: discards both earlier moves.
        room.apply_move("c1", 0, &mv("g1", "f3")).await.unwrap();

        let events = drain(&mut rx);
        let last = events.last().unwrap();
        assert_eq!(last.event, EventName::MOVE_APPLIED);
        assert_eq!(last.data["from_index"], 0);
        assert_eq!(last.data["cursor"], 1);
        assert_eq!(last.data["move_log_tail"]["first"], "g1-f3");
        assert_eq!(last.data["move_log_tail"]["second"], Value::Null);

        // Fresh join confirms the discarded future is gone.
        let mut probe = join(&room, "probe", Role::Observer).await;
        let boot = drain(&mut probe).remove(0);
        assert_eq!(boot.data["timeline"], json!(["P0", "P0 g1-f3"]));
        assert_eq!(boot.data["move_log"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn navigate_changes_cursor_only() {
        let room = test_room();
        let mut rx = join(&room, "c1", Role::Owner).await;
        room.apply_move("c1", 0, &mv("e2", "e4")).await.unwrap();
        room.apply_move("c1", 1, &mv("e7", "e5")).await.unwrap();

        room.navigate("c1", 0).await.unwrap();

        let events = drain(&mut rx);
        let last = events.last().unwrap();
        assert_eq!(last.event, EventName::NAV_APPLIED);
        assert_eq!(last.data, json!({ "cursor": 0 }));

        let mut probe = join(&room, "probe", Role::Observer).await;
        let boot = drain(&mut probe).remove(0);
        assert_eq!(boot.data["cursor"], 0);
        assert_eq!(boot.data["timeline"].as_array().unwrap().len(), 3);
        assert_eq!(boot.data["move_log"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn navigate_is_owner_only_even_with_control() {
        let room = test_room();
        let _owner_rx = join(&room, "c1", Role::Owner).await;
        let _obs_rx = join(&room, "c2", Role::Observer).await;
        room.apply_move("c1", 0, &mv("e2", "e4")).await.unwrap();
        room.authorize("c1", "c2", true).await.unwrap();

        let err = room.navigate("c2", 0).await.unwrap_err();
        assert_eq!(err, SyncError::Unauthorized("navigate"));
    }

    #[tokio::test]
    async fn navigate_out_of_range_is_rejected() {
        let room = test_room();
        let _rx = join(&room, "c1", Role::Owner).await;
        let err = room.navigate("c1", 1).await.unwrap_err();
        assert_eq!(err, SyncError::BadIndex { index: 1, len: 1 });
    }

    #[tokio::test]
    async fn leave_broadcasts_roster_and_closes_when_empty() {
        let room = test_room();
        let _rx1 = join(&room, "c1", Role::Owner).await;
        let mut rx2 = join(&room, "c2", Role::Observer).await;

        assert!(!room.leave("c1").await);
        let events = drain(&mut rx2);
        let last = events.last().unwrap();
        assert_eq!(last.event, EventName::ROSTER_UPDATE);
        assert_eq!(last.data["roster"].as_array().unwrap().len(), 1);

        assert!(room.leave("c2").await);
        assert!(room.is_closed());
    }

    #[tokio::test]
    async fn closed_room_refuses_joins() {
        let room = test_room();
        let _rx = join(&room, "c1", Role::Owner).await;
        room.leave("c1").await;

        let (tx, _rx2) = mpsc::unbounded_channel();
        let p = Participant::new(
            "c2".to_string(),
            "usr_c2".to_string(),
            "User c2".to_string(),
            Role::Observer,
        );
        assert_eq!(room.join(p, tx).await.unwrap_err(), SyncError::RoomClosed);
    }

    #[tokio::test]
    async fn load_replaces_the_board_for_everyone() {
        let room = test_room();
        let mut rx = join(&room, "c1", Role::Owner).await;
        room.apply_move("c1", 0, &mv("e2", "e4")).await.unwrap();

        room.load("c1", "1. d4 d5").await.unwrap();

        let events = drain(&mut rx);
        let last = events.last().unwrap();
        assert_eq!(last.event, EventName::TIMELINE_LOADED);
        assert_eq!(last.data["timeline"], json!(["L0", "L1", "L2"]));
        assert_eq!(last.data["cursor"], 0);
        assert_eq!(last.data["move_log"][0]["second"], "d5");
    }

    #[tokio::test]
    async fn load_is_owner_only() {
        let room = test_room();
        let _owner_rx = join(&room, "c1", Role::Owner).await;
        let _obs_rx = join(&room, "c2", Role::Observer).await;
        room.authorize("c1", "c2", true).await.unwrap();

        let err = room.load("c2", "1. d4").await.unwrap_err();
        assert_eq!(err, SyncError::Unauthorized("load a game"));
    }

    #[tokio::test]
    async fn unknown_requester_is_rejected() {
        let room = test_room();
        let _rx = join(&room, "c1", Role::Owner).await;
        assert_eq!(
            room.apply_move("ghost", 0, &mv("e2", "e4")).await.unwrap_err(),
            SyncError::UnknownParticipant
        );
        assert_eq!(
            room.navigate("ghost", 0).await.unwrap_err(),
            SyncError::UnknownParticipant
        );
    }
}
