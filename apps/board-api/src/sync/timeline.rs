//! The shared timeline: the session's authoritative line of play.
//!
//! An append/truncate-only sequence of positions plus one notation string per
//! transition. The wire-visible move-pair log is derived from the notation
//! log on demand, so the two cannot diverge.

use serde::Serialize;

use crate::oracle::Position;

/// One move pair as shown to clients: the first side's move and, once played,
/// the second side's reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MovePair {
    pub ordinal: u32,
    pub first: String,
    pub second: Option<String>,
}

/// Ordered positions + notation log for one session. Never empty: the first
/// entry is the session's starting position.
#[derive(Debug, Clone)]
pub struct Timeline {
    positions: Vec<Position>,
    notations: Vec<String>,
}

impl Timeline {
    pub fn new(start: Position) -> Self {
        Self {
            positions: vec![start],
            notations: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    /// Index of the current tip.
    pub fn tip(&self) -> usize {
        self.positions.len() - 1
    }

    pub fn position(&self, index: usize) -> Option<&Position> {
        self.positions.get(index)
    }

    pub fn positions(&self) -> &[Position] {
        &self.positions
    }

    pub fn notations(&self) -> &[String] {
        &self.notations
    }

    /// Branch from `from_index`: discard everything after it, then append the
    /// new position and its notation. Returns the new tip index.
    ///
    /// Caller must have validated `from_index < len()`.
    pub fn branch(&mut self, from_index: usize, position: Position, notation: String) -> usize {
        debug_assert!(from_index < self.positions.len());
        self.positions.truncate(from_index + 1);
        self.notations.truncate(from_index);
        self.positions.push(position);
        self.notations.push(notation);
        self.tip()
    }

    /// Replace the whole timeline with a parsed sequence (LOAD).
    ///
    /// Caller must have validated `positions.len() == notations.len() + 1`.
    pub fn replace(&mut self, positions: Vec<Position>, notations: Vec<String>) {
        debug_assert!(!positions.is_empty());
        debug_assert_eq!(positions.len(), notations.len() + 1);
        self.positions = positions;
        self.notations = notations;
    }

    /// The notation log grouped two-by-two, pairing anchored at the first
    /// transition. A trailing unanswered move yields a half-filled pair.
    pub fn move_pairs(&self) -> Vec<MovePair> {
        self.notations
            .chunks(2)
            .enumerate()
            .map(|(i, chunk)| MovePair {
                ordinal: i as u32 + 1,
                first: chunk[0].clone(),
                second: chunk.get(1).cloned(),
            })
            .collect()
    }

    /// The pair containing the most recent move, if any move has been played.
    pub fn last_pair(&self) -> Option<MovePair> {
        self.move_pairs().pop()
    }
}
