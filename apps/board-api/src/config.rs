/// Board API configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the chess-rules oracle service (e.g. `http://localhost:4100`).
    pub oracle_url: String,
    /// Shared secret for verifying join tokens minted by the class-management app.
    pub join_token_secret: String,
    /// Starting position handed to rooms that are not seeded explicitly.
    pub start_position: String,
    /// Port the HTTP server binds to.
    pub port: u16,
}

/// The standard chess starting position in FEN. Opaque to the coordinator;
/// the oracle is the only component that interprets it.
pub const STANDARD_START: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Panics with a descriptive message if a required variable is missing.
    pub fn from_env() -> Self {
        Self {
            oracle_url: required_var("ORACLE_URL"),
            join_token_secret: required_var("JOIN_TOKEN_SECRET"),
            start_position: std::env::var("START_POSITION")
                .ok()
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| STANDARD_START.to_string()),
            port: std::env::var("PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(4010),
        }
    }
}

fn required_var(name: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| panic!("{name} env var is required"))
}
