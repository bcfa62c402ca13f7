//! Shared helpers for sync session integration tests.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use graphsync_core::graph::{GraphSnapshot, Node, Position, SavePayload};
use graphsync_core::types::{Config, Version};
use graphsync_engine::{SessionHandle, SyncConfig, SyncSession};
use graphsync_gateway::{GatewayError, MemoryGateway, PersistenceGateway, SaveOutcome};
use tokio::time::Instant;

pub const GRAPH: &str = "demo";

/// A save as the gateway saw it.
#[derive(Debug, Clone)]
pub struct RecordedSave {
    pub at: Instant,
    pub payload: SavePayload,
}

/// Gateway over a [`MemoryGateway`] that records every save attempt and can
/// be told to add latency, fail, or serve a canned snapshot.
pub struct ScriptedGateway {
    inner: MemoryGateway,
    saves: Mutex<Vec<RecordedSave>>,
    save_latency: Mutex<Duration>,
    load_latency: Mutex<Duration>,
    failures: AtomicUsize,
    canned_loads: Mutex<VecDeque<GraphSnapshot>>,
    loads: AtomicUsize,
}

impl ScriptedGateway {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: MemoryGateway::new(GRAPH),
            saves: Mutex::new(Vec::new()),
            save_latency: Mutex::new(Duration::ZERO),
            load_latency: Mutex::new(Duration::ZERO),
            failures: AtomicUsize::new(0),
            canned_loads: Mutex::new(VecDeque::new()),
            loads: AtomicUsize::new(0),
        })
    }

    /// A gateway whose store already holds `snapshot`.
    pub async fn seeded(snapshot: GraphSnapshot) -> Arc<Self> {
        let gateway = Self::new();
        gateway.inner.store().lock().await.insert(snapshot);
        gateway
    }

    pub fn saves(&self) -> Vec<RecordedSave> {
        self.saves.lock().unwrap().clone()
    }

    pub fn save_count(&self) -> usize {
        self.saves.lock().unwrap().len()
    }

    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn set_save_latency(&self, latency: Duration) {
        *self.save_latency.lock().unwrap() = latency;
    }

    pub fn set_load_latency(&self, latency: Duration) {
        *self.load_latency.lock().unwrap() = latency;
    }

    /// The next `n` saves fail with a 503.
    pub fn fail_next_saves(&self, n: usize) {
        self.failures.store(n, Ordering::SeqCst);
    }

    /// The next load returns `snapshot` instead of the stored copy.
    pub fn serve_next_load(&self, snapshot: GraphSnapshot) {
        self.canned_loads.lock().unwrap().push_back(snapshot);
    }

    pub async fn current(&self) -> GraphSnapshot {
        self.inner.current().await.expect("graph should be stored")
    }

    /// Simulate another writer: edit the stored graph and bump its version.
    pub async fn commit_external(&self, edit: impl FnOnce(&mut GraphSnapshot)) -> Version {
        let store = self.inner.store();
        let mut store = store.lock().await;
        let mut snapshot = store.get(GRAPH).cloned().expect("graph should be stored");
        edit(&mut snapshot);
        snapshot.version += 1;
        snapshot.updated_at = chrono::Utc::now();
        let version = snapshot.version;
        store.insert(snapshot);
        version
    }
}

#[async_trait]
impl PersistenceGateway for ScriptedGateway {
    fn graph_name(&self) -> &str {
        GRAPH
    }

    async fn load(&self) -> Result<GraphSnapshot, GatewayError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        let latency = *self.load_latency.lock().unwrap();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        let canned = self.canned_loads.lock().unwrap().pop_front();
        match canned {
            Some(snapshot) => Ok(snapshot),
            None => self.inner.load().await,
        }
    }

    async fn save(&self, payload: SavePayload) -> SaveOutcome {
        self.saves.lock().unwrap().push(RecordedSave {
            at: Instant::now(),
            payload: payload.clone(),
        });

        let latency = *self.save_latency.lock().unwrap();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return SaveOutcome::TransportError(GatewayError::Api {
                status: 503,
                body: "Service Unavailable".into(),
            });
        }

        self.inner.save(payload).await
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

pub fn ms(n: u64) -> Duration {
    Duration::from_millis(n)
}

/// Version-1 graph with nodes `a` (10, 20) and `b` (300, 20).
pub fn two_nodes() -> GraphSnapshot {
    let mut snapshot = GraphSnapshot::empty(GRAPH);
    snapshot.version = 1;
    snapshot.updated_at = chrono::Utc::now();
    snapshot.nodes = vec![
        Node::new("a", "shell", Position::new(10.0, 20.0)),
        Node::new("b", "shell", Position::new(300.0, 20.0)),
    ];
    snapshot
}

pub fn patch(key: &str, value: serde_json::Value) -> Config {
    let mut config = Config::new();
    config.insert(key.to_string(), value);
    config
}

/// Start a session and wait for the initial load to land.
pub async fn start(gateway: &Arc<ScriptedGateway>, debounce: Duration) -> SessionHandle {
    let config = SyncConfig::default().with_debounce(debounce);
    let handle = SyncSession::start(gateway.clone(), config);
    let view = handle.snapshot().await.expect("session should be running");
    assert!(!view.loading);
    handle
}
