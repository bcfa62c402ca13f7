//! In-process event bus backed by a `tokio::sync::broadcast` channel.
//!
//! [`EventBus`] fans [`SyncEvent`]s out to any number of observers (save
//! banners, error indicators, logs). Publishing never blocks the session.

use chrono::Utc;
use graphsync_core::save_state::SaveState;
use graphsync_core::types::{Timestamp, Version};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

// ---------------------------------------------------------------------------
// SyncEvent
// ---------------------------------------------------------------------------

/// What happened to a graph's sync state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SyncEventKind {
    SaveStateChanged { from: SaveState, to: SaveState },
    Saved { version: Version },
    Conflict { local_version: Version, server_version: Version },
    SaveFailed { error: String },
    Hydrated { version: Version, retained_fields: usize },
    LoadFailed { error: String },
    Disposed,
}

impl SyncEventKind {
    /// Dot-separated name used in logs, e.g. `"sync.saved"`.
    pub fn name(&self) -> &'static str {
        match self {
            SyncEventKind::SaveStateChanged { .. } => "sync.state_changed",
            SyncEventKind::Saved { .. } => "sync.saved",
            SyncEventKind::Conflict { .. } => "sync.conflict",
            SyncEventKind::SaveFailed { .. } => "sync.save_failed",
            SyncEventKind::Hydrated { .. } => "sync.hydrated",
            SyncEventKind::LoadFailed { .. } => "sync.load_failed",
            SyncEventKind::Disposed => "sync.disposed",
        }
    }
}

/// Envelope published on the bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncEvent {
    /// Name of the graph the session is bound to.
    pub graph: String,
    #[serde(flatten)]
    pub kind: SyncEventKind,
    pub timestamp: Timestamp,
}

impl SyncEvent {
    pub fn new(graph: impl Into<String>, kind: SyncEventKind) -> Self {
        Self {
            graph: graph.into(),
            kind,
            timestamp: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Default buffer capacity for the broadcast channel.
pub const DEFAULT_CAPACITY: usize = 256;

/// In-process fan-out event bus.
///
/// ```rust
/// use graphsync_events::bus::{EventBus, SyncEvent, SyncEventKind};
///
/// let bus = EventBus::default();
/// let mut rx = bus.subscribe();
///
/// bus.publish(SyncEvent::new("demo", SyncEventKind::Disposed));
/// ```
#[derive(Debug)]
pub struct EventBus {
    sender: broadcast::Sender<SyncEvent>,
}

impl EventBus {
    /// Create a bus with a specific channel capacity.
    ///
    /// When the buffer is full the oldest messages are dropped and slow
    /// receivers observe `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish to all current subscribers. Dropped if nobody listens.
    pub fn publish(&self, event: SyncEvent) {
        tracing::trace!(graph = %event.graph, event = event.kind.name(), "Publishing sync event");
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
