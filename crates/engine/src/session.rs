//! The sync session actor and its UI handle.
//!
//! One tokio task owns the [`GraphModel`], the classifier, the scheduler and
//! the resolver. UI calls on [`SessionHandle`] become [`Command`]s processed
//! strictly in order; gateway calls run as spawned tasks whose results are fed
//! back into the same loop, so edits keep being classified and applied while
//! a save or load is outstanding.
//!
//! The current [`SessionView`] is published on a `watch` channel after every
//! turn, and lifecycle events go out on the session's [`EventBus`].

use std::collections::VecDeque;
use std::sync::Arc;

use graphsync_core::canvas;
use graphsync_core::change::{ChangeEvent, Connection};
use graphsync_core::classifier::{ChangeClassifier, Verdict};
use graphsync_core::graph::{Edge, GraphModel, GraphSnapshot, Node};
use graphsync_core::hydration::HydrationGuard;
use graphsync_core::save_state::{ConflictRecord, SaveState};
use graphsync_core::types::{Config, NodeId, Version};
use graphsync_events::{EventBus, SyncEvent, SyncEventKind};
use graphsync_gateway::{GatewayError, HttpGateway, PersistenceGateway, SaveOutcome};
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::Instant;

use crate::config::SyncConfig;
use crate::resolver::{ConflictResolver, Settlement};
use crate::scheduler::{DirtyScheduler, TimerOutcome};
use crate::SessionError;

// ---------------------------------------------------------------------------
// View
// ---------------------------------------------------------------------------

/// Read-only projection of the session for the UI.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    /// True until the initial load has been hydrated.
    pub loading: bool,
    pub name: String,
    pub version: Version,
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
    pub selected: Vec<String>,
    pub save_state: SaveState,
    pub conflict: Option<ConflictRecord>,
    pub last_error: Option<String>,
}

impl SessionView {
    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|node| node.id == id)
    }
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

#[derive(Debug)]
enum Command {
    Changes(Vec<ChangeEvent>),
    AddNode { id: NodeId, template: String },
    RefreshFromConflict,
    Retry,
    Refresh,
    Snapshot(oneshot::Sender<SessionView>),
    Dispose(oneshot::Sender<SessionView>),
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// UI-facing handle to a running session.
///
/// Cloning is cheap. The session stops as soon as every handle is dropped;
/// an in-flight save response is then discarded.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    commands: mpsc::UnboundedSender<Command>,
    view: watch::Receiver<SessionView>,
    bus: Arc<EventBus>,
}

impl SessionHandle {
    /// Latest published view.
    pub fn view(&self) -> SessionView {
        self.view.borrow().clone()
    }

    /// Receiver that is notified on every view change.
    pub fn watch(&self) -> watch::Receiver<SessionView> {
        self.view.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.bus.subscribe()
    }

    /// One batch of node changes from the canvas.
    pub fn on_nodes_change(&self, events: Vec<ChangeEvent>) -> Result<(), SessionError> {
        self.send(Command::Changes(events))
    }

    /// One batch of edge changes from the canvas.
    pub fn on_edges_change(&self, events: Vec<ChangeEvent>) -> Result<(), SessionError> {
        self.send(Command::Changes(events))
    }

    pub fn on_connect(&self, connection: Connection) -> Result<(), SessionError> {
        self.send(Command::Changes(vec![ChangeEvent::Connect { connection }]))
    }

    /// Add a node from `template` at the next free grid slot. Returns its id.
    pub fn add_node(&self, template: impl Into<String>) -> Result<NodeId, SessionError> {
        let id = uuid::Uuid::new_v4().to_string();
        self.send(Command::AddNode {
            id: id.clone(),
            template: template.into(),
        })?;
        Ok(id)
    }

    /// Shallow-merge `patch` into a node's `config`.
    pub fn update_node_data(&self, id: impl Into<NodeId>, patch: Config) -> Result<(), SessionError> {
        self.send(Command::Changes(vec![ChangeEvent::DataEdit { id: id.into(), patch }]))
    }

    /// Discard local state and adopt the server copy from the last conflict.
    pub fn refresh_from_conflict(&self) -> Result<(), SessionError> {
        self.send(Command::RefreshFromConflict)
    }

    /// Re-arm the scheduler after a failed save.
    pub fn retry(&self) -> Result<(), SessionError> {
        self.send(Command::Retry)
    }

    /// Re-fetch the graph in the background and hydrate it.
    pub fn refresh(&self) -> Result<(), SessionError> {
        self.send(Command::Refresh)
    }

    /// The view after every previously sent command has been processed.
    pub async fn snapshot(&self) -> Result<SessionView, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Snapshot(tx))?;
        rx.await.map_err(|_| SessionError::Closed)
    }

    /// Stop the session and return the final view.
    ///
    /// A pending save is cancelled. Saves and loads already in flight are
    /// awaited and applied first.
    pub async fn dispose(self) -> Result<SessionView, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Dispose(tx))?;
        rx.await.map_err(|_| SessionError::Closed)
    }

    fn send(&self, command: Command) -> Result<(), SessionError> {
        self.commands.send(command).map_err(|_| SessionError::Closed)
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

pub struct SyncSession;

impl SyncSession {
    /// Spawn a session bound to `gateway` and start the initial load.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(gateway: Arc<dyn PersistenceGateway>, config: SyncConfig) -> SessionHandle {
        let bus = Arc::new(EventBus::new(config.event_capacity));
        let model = GraphModel::empty(gateway.graph_name());
        let (view_tx, view_rx) = watch::channel(SessionView {
            loading: true,
            name: model.name().to_string(),
            version: model.version(),
            nodes: Vec::new(),
            edges: Vec::new(),
            selected: Vec::new(),
            save_state: SaveState::Idle,
            conflict: None,
            last_error: None,
        });
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();

        let actor = SessionActor {
            guard: HydrationGuard::new(config.guarded_fields.iter().cloned()),
            scheduler: DirtyScheduler::new(config.debounce),
            classifier: ChangeClassifier::new(),
            resolver: ConflictResolver::new(),
            model,
            gateway,
            bus: Arc::clone(&bus),
            view_tx,
            loading: true,
            buffered: VecDeque::new(),
            load_task: None,
            save_task: None,
            refresh_after_settle: false,
            conflict_refresh_after_settle: false,
            disposing: None,
        };
        tokio::spawn(actor.run(commands_rx));

        SessionHandle {
            commands: commands_tx,
            view: view_rx,
            bus,
        }
    }

    /// [`start`](Self::start) with configuration from the environment.
    pub fn start_from_env(gateway: Arc<dyn PersistenceGateway>) -> Result<SessionHandle, SessionError> {
        let config = SyncConfig::from_env()?;
        Ok(Self::start(gateway, config))
    }

    /// Start a session against the graph server at `base_url`, using the
    /// configured request timeout.
    pub fn connect(
        base_url: &str,
        graph_name: impl Into<String>,
        config: SyncConfig,
    ) -> Result<SessionHandle, SessionError> {
        let gateway = HttpGateway::new(base_url, graph_name, config.gateway_timeout)?;
        tracing::info!(url = %gateway.url(), "Connecting sync session");
        Ok(Self::start(Arc::new(gateway), config))
    }
}

struct SessionActor {
    gateway: Arc<dyn PersistenceGateway>,
    model: GraphModel,
    classifier: ChangeClassifier,
    scheduler: DirtyScheduler,
    resolver: ConflictResolver,
    guard: HydrationGuard,
    bus: Arc<EventBus>,
    view_tx: watch::Sender<SessionView>,
    /// Initial load still pending; commands are buffered meanwhile.
    loading: bool,
    buffered: VecDeque<Command>,
    load_task: Option<JoinHandle<Result<GraphSnapshot, GatewayError>>>,
    save_task: Option<JoinHandle<SaveOutcome>>,
    refresh_after_settle: bool,
    conflict_refresh_after_settle: bool,
    disposing: Option<oneshot::Sender<SessionView>>,
}

impl SessionActor {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        tracing::debug!(graph = %self.model.name(), "Sync session started");
        self.start_load();

        loop {
            if self.disposing.is_some() && self.save_task.is_none() && self.load_task.is_none() {
                self.finish_dispose();
                return;
            }

            let before = self.resolver.state();
            tokio::select! {
                biased;

                command = commands.recv(), if self.disposing.is_none() => match command {
                    Some(command) => self.handle(command),
                    None => {
                        self.teardown();
                        return;
                    }
                },
                result = join_slot(&mut self.save_task) => self.on_saved(result),
                result = join_slot(&mut self.load_task) => self.on_loaded(result),
                _ = sleep_until_deadline(self.scheduler.deadline()) => self.on_timer(),
            }
            self.after_turn(before);
        }
    }

    // ---- commands ----

    fn handle(&mut self, command: Command) {
        if let Command::Dispose(reply) = command {
            self.begin_dispose(reply);
            return;
        }
        if self.loading {
            self.buffered.push_back(command);
            return;
        }

        match command {
            Command::Changes(events) => self.apply_changes(&events),
            Command::AddNode { id, template } => self.add_node(id, template),
            Command::RefreshFromConflict => {
                if self.save_task.is_some() {
                    self.conflict_refresh_after_settle = true;
                } else {
                    self.refresh_from_conflict();
                }
            }
            Command::Retry => self.retry(),
            Command::Refresh => {
                if self.save_task.is_some() {
                    self.refresh_after_settle = true;
                } else {
                    self.start_load();
                }
            }
            Command::Snapshot(reply) => {
                let _ = reply.send(self.view());
            }
            Command::Dispose(_) => {}
        }
    }

    /// Classify against the pre-batch model, then apply in event order.
    fn apply_changes(&mut self, events: &[ChangeEvent]) {
        let verdict = self.classifier.classify(&self.model, events);
        self.model.apply_batch(events);

        if verdict == Verdict::Structural {
            self.scheduler.notify(verdict, Instant::now());
            self.resolver.mark_dirty();
        }
    }

    fn add_node(&mut self, id: NodeId, template: String) {
        let count = self.model.node_count();
        if let Err(e) = canvas::validate_node_count(count + 1) {
            tracing::warn!(graph = %self.model.name(), error = %e, "Node not added");
            return;
        }
        let node = Node::new(id, template, canvas::grid_position(count));
        self.apply_changes(&[ChangeEvent::Add { node }]);
    }

    /// Re-arm the save after a failure, or re-fetch when the failure left
    /// nothing to save (a failed initial load).
    fn retry(&mut self) {
        if self.resolver.state() != SaveState::Error {
            return;
        }
        if self.scheduler.flush_needed(self.model.revision()) {
            self.scheduler.notify(Verdict::Structural, Instant::now());
            self.resolver.mark_dirty();
        } else if self.save_task.is_none() {
            self.start_load();
        }
    }

    fn refresh_from_conflict(&mut self) {
        if let Some(version) = self.resolver.refresh_from_conflict(&mut self.model) {
            // The adopted copy is what the server holds; nothing is pending.
            self.scheduler.cancel();
            self.scheduler.mark_saved(self.model.revision());
            self.classifier.reset();
            self.publish(SyncEventKind::Hydrated {
                version,
                retained_fields: 0,
            });
        }
    }

    // ---- load / hydrate ----

    fn start_load(&mut self) {
        if self.load_task.is_some() {
            return;
        }
        let gateway = Arc::clone(&self.gateway);
        self.load_task = Some(tokio::spawn(async move { gateway.load().await }));
    }

    fn on_loaded(&mut self, result: Result<Result<GraphSnapshot, GatewayError>, JoinError>) {
        let result = result.unwrap_or_else(|e| Err(GatewayError::Aborted(e.to_string())));
        let initial = std::mem::replace(&mut self.loading, false);

        match result {
            Ok(snapshot) => self.hydrate(snapshot, initial),
            Err(GatewayError::NotFound(name)) if initial => {
                tracing::info!(graph = %name, "Graph not found on server, starting empty");
                self.scheduler.mark_saved(self.model.revision());
            }
            Err(e) => {
                tracing::warn!(graph = %self.model.name(), error = %e, "Graph load failed");
                if initial {
                    self.scheduler.mark_saved(self.model.revision());
                    self.resolver.record_error(e.to_string());
                }
                self.publish(SyncEventKind::LoadFailed { error: e.to_string() });
            }
        }

        if initial {
            while let Some(command) = self.buffered.pop_front() {
                self.handle(command);
            }
        }
    }

    fn hydrate(&mut self, snapshot: GraphSnapshot, initial: bool) {
        let local_version = self.model.version();

        if !initial && snapshot.version < local_version {
            tracing::debug!(
                graph = %self.model.name(),
                local_version,
                incoming = snapshot.version,
                "Discarding stale snapshot",
            );
            return;
        }

        if self.resolver.conflict().is_some() {
            // Never auto-resolve; only keep the parked copy current.
            let newer = self
                .resolver
                .conflict()
                .is_some_and(|record| snapshot.version > record.current_server_snapshot.version);
            if newer {
                self.resolver.update_conflict(ConflictRecord {
                    current_server_snapshot: snapshot,
                    detected_at: chrono::Utc::now(),
                });
            }
            return;
        }

        if !initial && snapshot.version == local_version && self.has_unsaved_work() {
            tracing::debug!(
                graph = %self.model.name(),
                version = local_version,
                "Local changes ahead of server copy, skipping hydration",
            );
            return;
        }

        let version = snapshot.version;
        let report = self.guard.hydrate(&mut self.model, snapshot);

        if report.local_ahead() {
            self.scheduler.notify(Verdict::Structural, Instant::now());
            self.resolver.mark_dirty();
        } else if initial || !self.has_unsaved_work() {
            // Commands buffered during the initial load have not run yet.
            self.scheduler.mark_saved(self.model.revision());
            self.resolver.reset_idle();
        }

        tracing::debug!(
            graph = %self.model.name(),
            version,
            retained = report.retained.len(),
            "Graph hydrated",
        );
        self.publish(SyncEventKind::Hydrated {
            version,
            retained_fields: report.retained.len(),
        });
    }

    fn has_unsaved_work(&self) -> bool {
        self.scheduler.has_pending() || self.save_task.is_some() || self.scheduler.flush_needed(self.model.revision())
    }

    // ---- save ----

    fn on_timer(&mut self) {
        match self.scheduler.on_timer(Instant::now()) {
            TimerOutcome::Flush => self.flush(),
            TimerOutcome::Deferred => {
                tracing::debug!(graph = %self.model.name(), "Save in flight, deferring flush");
            }
            TimerOutcome::NotDue => {}
        }
    }

    fn flush(&mut self) {
        // A gesture still in progress is saved at its origin; its end frame
        // decides whether the move is persisted.
        let classifier = &self.classifier;
        let payload = self
            .resolver
            .begin_save_pinned(&self.model, |id| classifier.drag_origin(id));
        self.scheduler.begin_flush();
        tracing::debug!(
            graph = %payload.name,
            version = payload.version,
            nodes = payload.nodes.len(),
            "Saving graph",
        );
        let gateway = Arc::clone(&self.gateway);
        self.save_task = Some(tokio::spawn(async move { gateway.save(payload).await }));
    }

    fn on_saved(&mut self, result: Result<SaveOutcome, JoinError>) {
        let outcome = result.unwrap_or_else(|e| SaveOutcome::TransportError(GatewayError::Aborted(e.to_string())));
        let settlement = self.resolver.settle(outcome, &mut self.model);
        let rerun = self.scheduler.settle();
        let saved = matches!(settlement, Settlement::Saved { .. });

        match settlement {
            Settlement::Saved { ack, revision } => {
                self.scheduler.mark_saved(revision);
                self.publish(SyncEventKind::Saved { version: ack.version });
            }
            Settlement::Conflict {
                local_version,
                server_version,
            } => self.publish(SyncEventKind::Conflict {
                local_version,
                server_version,
            }),
            Settlement::Failed(error) => self.publish(SyncEventKind::SaveFailed { error }),
        }

        if self.disposing.is_some() {
            return;
        }
        if std::mem::take(&mut self.conflict_refresh_after_settle) {
            self.refresh_from_conflict();
        }
        if rerun && self.scheduler.flush_needed(self.model.revision()) {
            self.flush();
        } else if std::mem::take(&mut self.refresh_after_settle) {
            self.start_load();
        }

        // Structural edits during the flight left a timer or a new flush
        // behind. Anything else that moved the model was cosmetic.
        if saved && self.save_task.is_none() && !self.scheduler.has_pending() {
            self.scheduler.mark_saved(self.model.revision());
            self.resolver.confirm_saved();
        }
    }

    // ---- lifecycle ----

    /// Stop scheduling. Outstanding gateway calls are left to settle and
    /// their results are still applied.
    fn begin_dispose(&mut self, reply: oneshot::Sender<SessionView>) {
        self.scheduler.dispose();
        // Pending snapshot requests see a closed session.
        self.buffered.clear();
        self.disposing = Some(reply);
    }

    fn finish_dispose(&mut self) {
        tracing::debug!(graph = %self.model.name(), version = self.model.version(), "Sync session disposed");
        self.publish(SyncEventKind::Disposed);
        let view = self.view();
        self.view_tx.send_replace(view.clone());
        if let Some(reply) = self.disposing.take() {
            let _ = reply.send(view);
        }
    }

    /// Every handle is gone: stop without waiting for anything.
    fn teardown(&mut self) {
        self.scheduler.dispose();
        if let Some(task) = self.save_task.take() {
            task.abort();
        }
        if let Some(task) = self.load_task.take() {
            task.abort();
        }
        tracing::debug!(graph = %self.model.name(), "Sync session dropped");
    }

    // ---- publishing ----

    fn after_turn(&mut self, before: SaveState) {
        let after = self.resolver.state();
        if after != before {
            tracing::debug!(graph = %self.model.name(), from = %before, to = %after, "Save state changed");
            self.publish(SyncEventKind::SaveStateChanged {
                from: before,
                to: after,
            });
        }
        self.view_tx.send_replace(self.view());
    }

    fn publish(&self, kind: SyncEventKind) {
        self.bus.publish(SyncEvent::new(self.model.name(), kind));
    }

    fn view(&self) -> SessionView {
        SessionView {
            loading: self.loading,
            name: self.model.name().to_string(),
            version: self.model.version(),
            nodes: self.model.nodes().cloned().collect(),
            edges: self.model.edges().cloned().collect(),
            selected: self.model.selected(),
            save_state: self.resolver.state(),
            conflict: self.resolver.conflict().cloned(),
            last_error: self.resolver.last_error().map(str::to_string),
        }
    }
}

/// Await the task in `slot`, clearing it once it finishes. Pends forever
/// when the slot is empty, so it can sit in a `select!` unconditionally.
async fn join_slot<T>(slot: &mut Option<JoinHandle<T>>) -> Result<T, JoinError> {
    match slot {
        Some(handle) => {
            let result = handle.await;
            *slot = None;
            result
        }
        None => std::future::pending().await,
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
