//! Change events emitted by the canvas interaction layer.
//!
//! One batch of [`ChangeEvent`]s is delivered per interaction tick. Each
//! batch is classified once (see [`crate::classifier`]) and then applied to
//! the [`GraphModel`](crate::graph::GraphModel) in event order.

use serde::{Deserialize, Serialize};

use crate::graph::{Edge, Node, Position};
use crate::types::{Config, EdgeId, NodeId};

/// A single UI change against the graph.
///
/// Serialized with an internally-tagged `"type"` discriminator so that the
/// frontend can emit events as plain JSON objects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ChangeEvent {
    /// A node or edge was (de)selected. Presentation state only.
    Select { id: String, selected: bool },

    /// One frame of a drag gesture. A gesture is one or more
    /// `dragging: true` frames followed by exactly one `dragging: false`.
    PositionDrag {
        id: NodeId,
        dragging: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        position: Option<Position>,
    },

    /// A node was added.
    Add { node: Node },

    /// A node (and its incident edges) or a single edge was removed.
    Remove { id: String },

    /// Two handles were connected.
    Connect { connection: Connection },

    /// An edge was removed.
    Disconnect { id: EdgeId },

    /// A shallow patch was merged into a node's `config`.
    DataEdit { id: NodeId, patch: Config },
}

impl ChangeEvent {
    /// The event's type tag, as used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            ChangeEvent::Select { .. } => "select",
            ChangeEvent::PositionDrag { .. } => "positionDrag",
            ChangeEvent::Add { .. } => "add",
            ChangeEvent::Remove { .. } => "remove",
            ChangeEvent::Connect { .. } => "connect",
            ChangeEvent::Disconnect { .. } => "disconnect",
            ChangeEvent::DataEdit { .. } => "dataEdit",
        }
    }
}

/// A new connection between two node handles, before it becomes an [`Edge`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
    pub source: NodeId,
    pub target: NodeId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_handle: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_handle: Option<String>,
}

impl Connection {
    pub fn new(source: impl Into<NodeId>, target: impl Into<NodeId>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            source_handle: None,
            target_handle: None,
        }
    }

    /// Deterministic edge id, so reconnecting the same handles is idempotent.
    pub fn edge_id(&self) -> EdgeId {
        format!(
            "e-{}{}-{}{}",
            self.source,
            self.source_handle.as_deref().unwrap_or(""),
            self.target,
            self.target_handle.as_deref().unwrap_or(""),
        )
    }

    pub fn into_edge(self) -> Edge {
        Edge {
            id: self.edge_id(),
            source: self.source,
            target: self.target,
            source_handle: self.source_handle,
            target_handle: self.target_handle,
        }
    }
}
