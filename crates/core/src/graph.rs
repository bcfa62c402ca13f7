//! In-memory graph model and its wire snapshots.
//!
//! [`GraphSnapshot`] is what the server stores and returns. [`GraphModel`]
//! is the locally mutable copy owned by a sync session: it adds selection
//! state and a local `revision` counter, neither of which is ever persisted.

use std::collections::HashSet;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::change::ChangeEvent;
use crate::error::CoreError;
use crate::types::{Config, EdgeId, NodeId, Timestamp, Version};

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

/// Canvas coordinates of a node's top-left corner.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub template: String,
    pub position: Position,
    #[serde(default)]
    pub config: Config,
}

impl Node {
    pub fn new(id: impl Into<NodeId>, template: impl Into<String>, position: Position) -> Self {
        Self {
            id: id.into(),
            template: template.into(),
            position,
            config: Config::new(),
        }
    }

    pub fn with_config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Edge {
    pub id: EdgeId,
    pub source: NodeId,
    pub target: NodeId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_handle: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_handle: Option<String>,
}

/// The full server-held state of one graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphSnapshot {
    pub name: String,
    pub version: Version,
    pub updated_at: Timestamp,
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub edges: Vec<Edge>,
}

impl GraphSnapshot {
    /// An empty, never-saved graph (version 0).
    pub fn empty(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: 0,
            updated_at: Timestamp::default(),
            nodes: Vec::new(),
            edges: Vec::new(),
        }
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        validate_graph(&self.nodes, &self.edges)
    }
}

/// Body of a save request: the snapshot minus server-owned fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavePayload {
    pub name: String,
    /// The version the writer believes is current.
    pub version: Version,
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
}

impl SavePayload {
    pub fn validate(&self) -> Result<(), CoreError> {
        validate_graph(&self.nodes, &self.edges)
    }
}

/// Server acknowledgement of an accepted save.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveAck {
    pub version: Version,
    pub updated_at: Timestamp,
}

/// Check that node ids are unique and every edge endpoint exists.
pub fn validate_graph(nodes: &[Node], edges: &[Edge]) -> Result<(), CoreError> {
    let mut ids = HashSet::with_capacity(nodes.len());
    for node in nodes {
        if !ids.insert(node.id.as_str()) {
            return Err(CoreError::DuplicateNode(node.id.clone()));
        }
    }
    for edge in edges {
        for endpoint in [&edge.source, &edge.target] {
            if !ids.contains(endpoint.as_str()) {
                return Err(CoreError::DanglingEdge {
                    edge: edge.id.clone(),
                    node: endpoint.clone(),
                });
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// GraphModel
// ---------------------------------------------------------------------------

/// Locally mutable graph owned by exactly one writer.
///
/// Every mutation that changes persisted content bumps [`revision`]
/// (a local counter that is never sent to the server). Selection changes
/// do not.
///
/// [`revision`]: GraphModel::revision
#[derive(Debug, Clone)]
pub struct GraphModel {
    name: String,
    version: Version,
    updated_at: Timestamp,
    nodes: IndexMap<NodeId, Node>,
    edges: IndexMap<EdgeId, Edge>,
    selected: HashSet<String>,
    revision: u64,
}

impl GraphModel {
    pub fn empty(name: impl Into<String>) -> Self {
        Self::from_snapshot(GraphSnapshot::empty(name))
    }

    /// Build a model from a server snapshot.
    ///
    /// Duplicate node ids keep the last occurrence and edges whose endpoints
    /// are missing are dropped, so the model invariants always hold.
    pub fn from_snapshot(snapshot: GraphSnapshot) -> Self {
        let mut model = Self {
            name: String::new(),
            version: 0,
            updated_at: Timestamp::default(),
            nodes: IndexMap::new(),
            edges: IndexMap::new(),
            selected: HashSet::new(),
            revision: 0,
        };
        model.load(snapshot);
        model
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn updated_at(&self) -> Timestamp {
        self.updated_at
    }

    /// Local mutation counter.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn edges(&self) -> impl Iterator<Item = &Edge> {
        self.edges.values()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_selected(&self, id: &str) -> bool {
        self.selected.contains(id)
    }

    pub fn selected(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.selected.iter().cloned().collect();
        ids.sort();
        ids
    }

    pub fn snapshot(&self) -> GraphSnapshot {
        GraphSnapshot {
            name: self.name.clone(),
            version: self.version,
            updated_at: self.updated_at,
            nodes: self.nodes.values().cloned().collect(),
            edges: self.edges.values().cloned().collect(),
        }
    }

    /// Serialize the model as it is right now for a save request.
    pub fn save_payload(&self) -> SavePayload {
        self.save_payload_pinned(|_| None)
    }

    /// Like [`save_payload`](Self::save_payload), but nodes for which
    /// `pinned` returns a position are saved at that position instead of
    /// their live one.
    pub fn save_payload_pinned<F>(&self, pinned: F) -> SavePayload
    where
        F: Fn(&str) -> Option<Position>,
    {
        let nodes = self
            .nodes
            .values()
            .map(|node| match pinned(&node.id) {
                Some(position) => Node {
                    position,
                    ..node.clone()
                },
                None => node.clone(),
            })
            .collect();

        SavePayload {
            name: self.name.clone(),
            version: self.version,
            nodes,
            edges: self.edges.values().cloned().collect(),
        }
    }

    /// Record a server acknowledgement. Content is untouched, so the
    /// revision does not move.
    pub fn apply_ack(&mut self, ack: SaveAck) {
        self.version = ack.version;
        self.updated_at = ack.updated_at;
    }

    /// Overwrite the whole model with a server snapshot.
    pub fn replace(&mut self, snapshot: GraphSnapshot) {
        self.load(snapshot);
        self.revision += 1;
    }

    fn load(&mut self, snapshot: GraphSnapshot) {
        self.name = snapshot.name;
        self.version = snapshot.version;
        self.updated_at = snapshot.updated_at;
        self.nodes = snapshot
            .nodes
            .into_iter()
            .map(|node| (node.id.clone(), node))
            .collect();

        let nodes = &self.nodes;
        self.edges = snapshot
            .edges
            .into_iter()
            .filter(|edge| {
                let keep = nodes.contains_key(&edge.source) && nodes.contains_key(&edge.target);
                if !keep {
                    tracing::warn!(graph = %self.name, edge = %edge.id, "Dropping dangling edge");
                }
                keep
            })
            .map(|edge| (edge.id.clone(), edge))
            .collect();

        let nodes = &self.nodes;
        let edges = &self.edges;
        self.selected
            .retain(|id| nodes.contains_key(id) || edges.contains_key(id));
    }

    /// Apply a batch in event order. Events that cannot be applied are
    /// logged and skipped; the rest of the batch still applies.
    ///
    /// Returns the number of events that changed persisted content.
    pub fn apply_batch(&mut self, events: &[ChangeEvent]) -> usize {
        let mut changed = 0;
        for event in events {
            match self.apply(event) {
                Ok(true) => changed += 1,
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(graph = %self.name, event = event.kind(), error = %e, "Skipping change event");
                }
            }
        }
        changed
    }

    /// Apply one event. Returns whether persisted content changed.
    pub fn apply(&mut self, event: &ChangeEvent) -> Result<bool, CoreError> {
        let changed = match event {
            ChangeEvent::Select { id, selected } => {
                if !self.nodes.contains_key(id) && !self.edges.contains_key(id) {
                    return Err(CoreError::UnknownNode(id.clone()));
                }
                if *selected {
                    self.selected.insert(id.clone());
                } else {
                    self.selected.remove(id);
                }
                false
            }
            ChangeEvent::PositionDrag { id, position, .. } => {
                let node = self
                    .nodes
                    .get_mut(id)
                    .ok_or_else(|| CoreError::UnknownNode(id.clone()))?;
                match position {
                    Some(position) if *position != node.position => {
                        node.position = *position;
                        true
                    }
                    _ => false,
                }
            }
            ChangeEvent::Add { node } => {
                if self.nodes.contains_key(&node.id) {
                    return Err(CoreError::DuplicateNode(node.id.clone()));
                }
                self.nodes.insert(node.id.clone(), node.clone());
                true
            }
            ChangeEvent::Remove { id } => {
                if self.nodes.shift_remove(id).is_some() {
                    self.edges
                        .retain(|_, edge| edge.source != *id && edge.target != *id);
                    self.selected.remove(id);
                    true
                } else if self.edges.shift_remove(id).is_some() {
                    self.selected.remove(id);
                    true
                } else {
                    return Err(CoreError::UnknownNode(id.clone()));
                }
            }
            ChangeEvent::Connect { connection } => {
                for endpoint in [&connection.source, &connection.target] {
                    if !self.nodes.contains_key(endpoint) {
                        return Err(CoreError::DanglingEdge {
                            edge: connection.edge_id(),
                            node: endpoint.clone(),
                        });
                    }
                }
                let edge = connection.clone().into_edge();
                if self.edges.contains_key(&edge.id) {
                    false
                } else {
                    self.edges.insert(edge.id.clone(), edge);
                    true
                }
            }
            ChangeEvent::Disconnect { id } => {
                self.selected.remove(id);
                self.edges.shift_remove(id).is_some()
            }
            ChangeEvent::DataEdit { id, patch } => {
                let node = self
                    .nodes
                    .get_mut(id)
                    .ok_or_else(|| CoreError::UnknownNode(id.clone()))?;
                for (key, value) in patch {
                    node.config.insert(key.clone(), value.clone());
                }
                true
            }
        };

        if changed {
            self.revision += 1;
        }
        Ok(changed)
    }
}

impl Default for GraphModel {
    fn default() -> Self {
        Self::empty("")
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
