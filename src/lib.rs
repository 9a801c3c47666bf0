pub mod access;
pub mod api;
pub mod config;
pub mod error;
pub mod events;
pub mod identity;
pub mod stats;
pub mod storage;
pub mod ws;

use std::sync::Arc;

use config::DaemonConfig;
use events::ProjectRooms;
use storage::Storage;

/// Shared application state passed to every HTTP handler and connection task.
pub struct AppContext {
    pub config: Arc<DaemonConfig>,
    pub storage: Arc<Storage>,
    /// Live-channel registry: project id → subscribed connections.
    pub rooms: Arc<ProjectRooms>,
    pub started_at: std::time::Instant,
}
