//! In-process gateway over a shared [`VersionedStore`].
//!
//! Applies the same optimistic-concurrency rules as the HTTP server, without
//! a network hop. Several gateways can share one store to simulate
//! concurrent writers.

use std::sync::Arc;

use async_trait::async_trait;
use graphsync_core::graph::{GraphSnapshot, SavePayload};
use graphsync_core::store::{CommitRejection, VersionedStore};
use tokio::sync::Mutex;

use crate::{GatewayError, PersistenceGateway, SaveOutcome};

#[derive(Debug, Clone)]
pub struct MemoryGateway {
    store: Arc<Mutex<VersionedStore>>,
    graph_name: String,
}

impl MemoryGateway {
    /// A gateway over a fresh, empty store.
    pub fn new(graph_name: impl Into<String>) -> Self {
        Self::with_store(Arc::new(Mutex::new(VersionedStore::new())), graph_name)
    }

    pub fn with_store(store: Arc<Mutex<VersionedStore>>, graph_name: impl Into<String>) -> Self {
        Self {
            store,
            graph_name: graph_name.into(),
        }
    }

    pub fn store(&self) -> Arc<Mutex<VersionedStore>> {
        Arc::clone(&self.store)
    }

    /// The stored copy of this gateway's graph, if any.
    pub async fn current(&self) -> Option<GraphSnapshot> {
        self.store.lock().await.get(&self.graph_name).cloned()
    }
}

#[async_trait]
impl PersistenceGateway for MemoryGateway {
    fn graph_name(&self) -> &str {
        &self.graph_name
    }

    async fn load(&self) -> Result<GraphSnapshot, GatewayError> {
        self.current()
            .await
            .ok_or_else(|| GatewayError::NotFound(self.graph_name.clone()))
    }

    async fn save(&self, mut payload: SavePayload) -> SaveOutcome {
        payload.name = self.graph_name.clone();
        let result = self.store.lock().await.commit(payload, chrono::Utc::now());
        match result {
            Ok(ack) => SaveOutcome::Saved(ack),
            Err(CommitRejection::VersionConflict(current)) => SaveOutcome::Conflict { current: *current },
            Err(CommitRejection::Invalid(e)) => SaveOutcome::TransportError(GatewayError::Api {
                status: 400,
                body: e.to_string(),
            }),
            Err(CommitRejection::NotFound(name)) => SaveOutcome::TransportError(GatewayError::NotFound(name)),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
