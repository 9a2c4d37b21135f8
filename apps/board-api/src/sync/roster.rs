//! Roster and write-authority table for one session.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A participant's role, fixed at join time by their join token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Permanent, non-revocable write and navigate authority.
    Owner,
    /// Mirrors the board; may be granted move authority via `has_control`.
    Observer,
}

/// A connected participant as broadcast in roster updates.
#[derive(Debug, Clone, Serialize)]
pub struct Participant {
    pub connection_id: String,
    pub user_id: String,
    pub display_name: String,
    pub role: Role,
    /// Delegated move authority. Only meaningful for observers: owners have
    /// implicit full authority regardless of this flag.
    pub has_control: bool,
    pub joined_at: DateTime<Utc>,
}

impl Participant {
    pub fn new(
        connection_id: String,
        user_id: String,
        display_name: String,
        role: Role,
    ) -> Self {
        Self {
            connection_id,
            user_id,
            display_name,
            role,
            has_control: false,
            joined_at: Utc::now(),
        }
    }
}

/// Live set of connected participants, keyed by connection id.
#[derive(Debug, Default)]
pub struct Roster {
    members: HashMap<String, Participant>,
}

impl Roster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, participant: Participant) {
        self.members
            .insert(participant.connection_id.clone(), participant);
    }

    /// Remove a participant. Any delegated control dies with the entry.
    pub fn remove(&mut self, connection_id: &str) -> Option<Participant> {
        self.members.remove(connection_id)
    }

    pub fn get(&self, connection_id: &str) -> Option<&Participant> {
        self.members.get(connection_id)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Whether this connection may mutate the timeline: owners always,
    /// observers only while holding delegated control.
    pub fn can_move(&self, connection_id: &str) -> bool {
        match self.members.get(connection_id) {
            Some(p) => p.role == Role::Owner || p.has_control,
            None => false,
        }
    }

    /// Whether this connection may steer the shared cursor. Delegated
    /// control deliberately does not grant navigation.
    pub fn is_owner(&self, connection_id: &str) -> bool {
        matches!(
            self.members.get(connection_id),
            Some(p) if p.role == Role::Owner
        )
    }

    /// Flip a participant's delegated-control flag. Returns `false` if the
    /// target is not in the roster.
    pub fn set_control(&mut self, connection_id: &str, grant: bool) -> bool {
        match self.members.get_mut(connection_id) {
            Some(p) => {
                p.has_control = grant;
                true
            }
            None => false,
        }
    }

    /// Members in join order (connection id breaks timestamp ties), as
    /// broadcast to clients.
    pub fn members(&self) -> Vec<&Participant> {
        let mut all: Vec<&Participant> = self.members.values().collect();
        all.sort_by(|a, b| {
            a.joined_at
                .cmp(&b.joined_at)
                .then_with(|| a.connection_id.cmp(&b.connection_id))
        });
        all
    }
}
