//! Room registry: maps room keys to their live coordinator.
//!
//! Uses `DashMap` for shard-level concurrency. At most one live room exists
//! per key: a room that empties closes itself under its own lock, and joins
//! racing the eviction observe the closed flag and retry into a fresh
//! instance.

use std::sync::Arc;

use dashmap::DashMap;

use crate::oracle::{Position, PositionOracle};

use super::room::{Outbox, Room};
use super::roster::Participant;

pub struct RoomRegistry {
    rooms: DashMap<String, Arc<Room>>,
    oracle: Arc<dyn PositionOracle>,
    default_start: Position,
}

impl RoomRegistry {
    pub fn new(oracle: Arc<dyn PositionOracle>, default_start: Position) -> Self {
        Self {
            rooms: DashMap::new(),
            oracle,
            default_start,
        }
    }

    /// Join a room, creating it if the key is unseen. `start` seeds the
    /// timeline of a room created by this call; an existing room keeps its
    /// line regardless.
    pub async fn join(
        &self,
        room_key: &str,
        participant: Participant,
        start: Option<Position>,
        outbox: Outbox,
    ) -> Arc<Room> {
        loop {
            let room = self.get_or_create(room_key, start.as_ref());
            if room.join(participant.clone(), outbox.clone()).await.is_ok() {
                return room;
            }
            // RoomClosed: lost the race with an eviction. Drop the dead
            // instance (pointer identity guards a freshly created successor)
            // and retry against a fresh one.
            self.rooms
                .remove_if(room_key, |_, existing| Arc::ptr_eq(existing, &room));
        }
    }

    /// Surface a disconnect as Leave and evict the room once empty.
    pub async fn leave(&self, room_key: &str, connection_id: &str) {
        let room = match self.rooms.get(room_key) {
            Some(entry) => entry.value().clone(),
            None => return,
        };

        if room.leave(connection_id).await {
            self.rooms
                .remove_if(room_key, |_, existing| Arc::ptr_eq(existing, &room));
            tracing::info!(room_key = %room_key, "room emptied and evicted");
        }
    }

    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }

    fn get_or_create(&self, room_key: &str, start: Option<&Position>) -> Arc<Room> {
        self.rooms
            .entry(room_key.to_string())
            .or_insert_with(|| {
                tracing::info!(room_key = %room_key, "creating room");
                Arc::new(Room::new(
                    room_key.to_string(),
                    start.unwrap_or(&self.default_start).clone(),
                    self.oracle.clone(),
                ))
            })
            .clone()
    }
}
