use std::sync::Arc;

use async_trait::async_trait;
use jsonwebtoken::{Algorithm, EncodingKey, Header};

use board_api::auth::tokens::JoinClaims;
use board_api::config::Config;
use board_api::oracle::{
    AppliedMove, MoveDescriptor, OracleError, ParsedGame, Position, PositionOracle,
};
use board_api::sync::registry::RoomRegistry;
use board_api::sync::roster::Role;
use board_api::AppState;

pub const TEST_SECRET: &str = "test-join-secret";

/// Scripted rules oracle: accepts any move except from-square "xx", chains
/// the notation onto the position text so assertions can follow the line.
pub struct FakeOracle;

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
            positions: vec![
                Position::new("L0"),
                Position::new("L1"),
                Position::new("L2"),
            ],
            notations: vec!["d4".to_string(), "d5".to_string()],
            headers: Default::default(),
        })
    }
}

/// Build an AppState wired to the fake oracle and an in-memory registry.
pub fn test_state() -> AppState {
    let config = Config {
        oracle_url: "http://127.0.0.1:0".to_string(),
        join_token_secret: TEST_SECRET.to_string(),
        start_position: "P0".to_string(),
        port: 0,
    };
    let rooms = Arc::new(RoomRegistry::new(
        Arc::new(FakeOracle),
        Position::new(config.start_position.clone()),
    ));
    AppState {
        config: Arc::new(config),
        rooms,
    }
}

/// Mint a join token the way the class-management app would.
pub fn mint_join_token(room: &str, user_id: &str, name: &str, role: Role) -> String {
    let now = chrono::Utc::now().timestamp();
    let claims = JoinClaims {
        sub: user_id.to_string(),
        name: name.to_string(),
        room: room.to_string(),
        role,
        iat: now,
        exp: now + 300,
    };
    jsonwebtoken::encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(TEST_SECRET.as_bytes()),
    )
    .expect("mint join token")
}
