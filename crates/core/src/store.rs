//! In-memory graph storage with optimistic concurrency control.
//!
//! Used by the reference server and by the in-process gateway. A save is
//! accepted only when it names the version the store currently holds; the
//! store then bumps the version by one and stamps `updated_at`.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::canvas;
use crate::error::CoreError;
use crate::graph::{GraphSnapshot, SaveAck, SavePayload};
use crate::types::Timestamp;

/// Error code carried by a rejected save.
pub const VERSION_CONFLICT: &str = "VERSION_CONFLICT";

/// Body of a version-conflict response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictResponse {
    pub code: String,
    pub current: GraphSnapshot,
}

impl ConflictResponse {
    pub fn new(current: GraphSnapshot) -> Self {
        Self {
            code: VERSION_CONFLICT.to_string(),
            current,
        }
    }
}

/// Why a commit was refused.
#[derive(Debug, Clone, PartialEq)]
pub enum CommitRejection {
    /// The writer's version is not the stored one. Carries the stored copy.
    VersionConflict(Box<GraphSnapshot>),
    /// The payload breaks a graph invariant.
    Invalid(CoreError),
    /// Unknown graph and the writer did not ask to create it (version 0).
    NotFound(String),
}

#[derive(Debug, Clone, Default)]
pub struct VersionedStore {
    graphs: HashMap<String, GraphSnapshot>,
}

impl VersionedStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&GraphSnapshot> {
        self.graphs.get(name)
    }

    pub fn len(&self) -> usize {
        self.graphs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.graphs.is_empty()
    }

    /// Seed or overwrite a graph without any version check.
    pub fn insert(&mut self, snapshot: GraphSnapshot) {
        self.graphs.insert(snapshot.name.clone(), snapshot);
    }

    /// Accept `payload` if its version matches the stored one.
    ///
    /// A graph that does not exist yet is created by a payload with version
    /// 0. The stored version after a successful commit is always the
    /// payload's version plus one.
    pub fn commit(&mut self, payload: SavePayload, now: Timestamp) -> Result<SaveAck, CommitRejection> {
        payload.validate().map_err(CommitRejection::Invalid)?;
        canvas::validate_node_count(payload.nodes.len()).map_err(CommitRejection::Invalid)?;

        let current_version = match self.graphs.get(&payload.name) {
            Some(current) if current.version != payload.version => {
                return Err(CommitRejection::VersionConflict(Box::new(current.clone())));
            }
            Some(current) => current.version,
            None if payload.version == 0 => 0,
            None => return Err(CommitRejection::NotFound(payload.name)),
        };

        let ack = SaveAck {
            version: current_version + 1,
            updated_at: now,
        };
        self.graphs.insert(
            payload.name.clone(),
            GraphSnapshot {
                name: payload.name,
                version: ack.version,
                updated_at: ack.updated_at,
                nodes: payload.nodes,
                edges: payload.edges,
            },
        );
        Ok(ack)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
