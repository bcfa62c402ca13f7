//! Persistence gateway: how a sync session talks to the graph server.
//!
//! - [`PersistenceGateway`]: the async collaborator trait (`load`, `save`).
//! - [`SaveOutcome`]: three-way result of a save (saved, conflict, failure).
//! - [`HttpGateway`]: reqwest client for the `/api/v1/graphs/{name}` contract.
//! - [`MemoryGateway`]: in-process gateway over a [`VersionedStore`].
//!
//! [`VersionedStore`]: graphsync_core::store::VersionedStore

pub mod http;
pub mod memory;

use async_trait::async_trait;
use graphsync_core::graph::{GraphSnapshot, SaveAck, SavePayload};

pub use http::HttpGateway;
pub use memory::MemoryGateway;

/// Errors from the persistence transport.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// The HTTP request itself failed (network, DNS, TLS, timeout).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The server answered with an unexpected status.
    #[error("Graph server error ({status}): {body}")]
    Api { status: u16, body: String },

    /// The graph does not exist on the server.
    #[error("Graph not found: {0}")]
    NotFound(String),

    /// The response body did not have the expected shape.
    #[error("Malformed response: {0}")]
    Decode(String),

    #[error("Invalid server URL: {0}")]
    InvalidUrl(String),

    /// The task driving the request ended before producing a result.
    #[error("Request aborted: {0}")]
    Aborted(String),
}

/// Result of a save round-trip.
#[derive(Debug)]
pub enum SaveOutcome {
    /// Accepted. Carries the server-assigned version and timestamp.
    Saved(SaveAck),
    /// Rejected with `VERSION_CONFLICT`. Carries the server's current copy.
    Conflict { current: GraphSnapshot },
    /// The save did not complete. Local state is kept as-is.
    TransportError(GatewayError),
}

/// Network collaborator bound to exactly one graph.
#[async_trait]
pub trait PersistenceGateway: Send + Sync {
    /// Name of the graph this gateway reads and writes.
    fn graph_name(&self) -> &str;

    async fn load(&self) -> Result<GraphSnapshot, GatewayError>;

    async fn save(&self, payload: SavePayload) -> SaveOutcome;
}
