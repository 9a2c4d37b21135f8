//! Position oracle: the external chess-rules service consumed over HTTP.
//!
//! The coordinator treats positions and move descriptors as opaque values;
//! legality, notation, and parsing live entirely behind this interface.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// An opaque board position. Produced and consumed only by the oracle; the
/// coordinator never looks inside.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Position(pub String);

impl Position {
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }
}

/// A candidate move as sent by clients: origin/target squares plus an
/// optional promotion piece. Passed through to the oracle verbatim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MoveDescriptor {
    pub from: String,
    pub to: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub promotion: Option<String>,
}

/// A move the oracle accepted: the resulting position and its standard notation.
#[derive(Debug, Clone, Deserialize)]
pub struct AppliedMove {
    pub position: Position,
    pub notation: String,
}

/// A notation sequence parsed by the oracle into positions and per-move notation.
///
/// `positions` always includes the starting position, so
/// `notations.len() == positions.len() - 1`.
#[derive(Debug, Clone, Deserialize)]
pub struct ParsedGame {
    pub positions: Vec<Position>,
    pub notations: Vec<String>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

/// Oracle failure modes. `Rejected` carries the oracle's reason (illegal
/// move, unparseable text); `Unavailable` is a transport or service fault.
#[derive(Debug, Clone)]
pub enum OracleError {
    Rejected(String),
    Unavailable(String),
}

/// The rules-service capability the coordinator consumes. Stateless across
/// calls; safe to share between rooms without coordination.
#[async_trait]
pub trait PositionOracle: Send + Sync {
    /// Validate a candidate move against a position. Returns the new position
    /// and its standard notation, or `OracleError::Rejected`.
    async fn apply_move(
        &self,
        position: &Position,
        mv: &MoveDescriptor,
    ) -> Result<AppliedMove, OracleError>;

    /// Parse a notation sequence (e.g. PGN movetext) into positions.
    async fn parse_notation_sequence(&self, text: &str) -> Result<ParsedGame, OracleError>;
}

// ---------------------------------------------------------------------------
// HTTP implementation
// ---------------------------------------------------------------------------

/// HTTP client for the rules oracle service.
#[derive(Clone)]
pub struct HttpOracle {
    base_url: String,
    http: reqwest::Client,
}

#[derive(Serialize)]
struct ApplyRequest<'a> {
    position: &'a Position,
    #[serde(rename = "move")]
    mv: &'a MoveDescriptor,
}

#[derive(Serialize)]
struct ParseRequest<'a> {
    text: &'a str,
}

#[derive(Deserialize)]
struct RejectionBody {
    reason: String,
}

impl HttpOracle {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        }
    }

    async fn post_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: &impl Serialize,
    ) -> Result<T, OracleError> {
        let url = format!("{}{}", self.base_url, path);
        let resp = self
            .http
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| OracleError::Unavailable(e.to_string()))?;

        let status = resp.status();
        if status.is_success() {
            return resp
                .json::<T>()
                .await
                .map_err(|e| OracleError::Unavailable(format!("bad oracle response: {e}")));
        }

        // 4xx carries a structured rejection; anything else is a service fault.
        if status.is_client_error() {
            let reason = resp
                .json::<RejectionBody>()
                .await
                .map(|b| b.reason)
                .unwrap_or_else(|_| status.to_string());
            return Err(OracleError::Rejected(reason));
        }

        Err(OracleError::Unavailable(format!("oracle returned {status}")))
    }
}

#[async_trait]
impl PositionOracle for HttpOracle {
    async fn apply_move(
        &self,
        position: &Position,
        mv: &MoveDescriptor,
    ) -> Result<AppliedMove, OracleError> {
        self.post_json("/v1/apply", &ApplyRequest { position, mv })
            .await
    }

    async fn parse_notation_sequence(&self, text: &str) -> Result<ParsedGame, OracleError> {
        self.post_json("/v1/parse", &ParseRequest { text }).await
    }
}
