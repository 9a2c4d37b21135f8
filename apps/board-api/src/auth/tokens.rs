//! Join-token validation.
//!
//! Tokens are minted by the class-management app (HS256 over a shared
//! secret) and authorize one user to join one room in one role. This server
//! only verifies them; it never mints credentials.

use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use crate::sync::roster::Role;

/// Claims carried by a join token.
#[derive(Debug, Serialize, Deserialize)]
pub struct JoinClaims {
    /// User ID.
    pub sub: String,
    /// Display name shown in the roster.
    pub name: String,
    /// Room key this token is valid for.
    pub room: String,
    /// Role granted in that room.
    pub role: Role,
    pub iat: i64,
    pub exp: i64,
}

/// Validate a join token and check it was minted for `room_key`.
///
/// Checks signature and `exp` (jsonwebtoken handles expiry), then the
/// room binding. Returns a static reason string on failure; the caller
/// sends it in the close frame.
pub fn verify_join_token(
    secret: &str,
    token: &str,
    room_key: &str,
) -> Result<JoinClaims, &'static str> {
    let key = DecodingKey::from_secret(secret.as_bytes());
    let validation = Validation::new(Algorithm::HS256);

    let data = jsonwebtoken::decode::<JoinClaims>(token, &key, &validation).map_err(|e| {
        tracing::debug!(?e, "join token validation failed");
        "Invalid or expired join token"
    })?;

    if data.claims.room != room_key {
        return Err("Join token was minted for a different room");
    }

    Ok(data.claims)
}
