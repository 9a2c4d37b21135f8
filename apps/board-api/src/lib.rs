pub mod auth;
pub mod config;
pub mod error;
pub mod oracle;
pub mod routes;
pub mod sync;

use std::sync::Arc;

use config::Config;
use sync::registry::RoomRegistry;

/// Shared application state available to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub rooms: Arc<RoomRegistry>,
}
