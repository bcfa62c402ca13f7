use std::sync::Arc;

use graphsync_core::store::VersionedStore;
use tokio::sync::RwLock;

use crate::config::ServerConfig;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// Cheaply cloneable; everything is behind `Arc`.
#[derive(Clone)]
pub struct AppState {
    /// Every graph the server holds, with its version.
    pub store: Arc<RwLock<VersionedStore>>,
    pub config: Arc<ServerConfig>,
}

impl AppState {
    pub fn new(config: ServerConfig) -> Self {
        Self::with_store(VersionedStore::new(), config)
    }

    /// State over a pre-seeded store.
    pub fn with_store(store: VersionedStore, config: ServerConfig) -> Self {
        Self {
            store: Arc::new(RwLock::new(store)),
            config: Arc::new(config),
        }
    }
}
