//! Structural-vs-noise classification of change batches.
//!
//! [`ChangeClassifier::classify`] reads the model as it was *before* the
//! batch and never mutates it, so it can be driven with literal event
//! fixtures. The only state it keeps is the origin of each drag gesture that
//! is still in progress.

use std::collections::HashMap;

use serde::Serialize;

use crate::change::ChangeEvent;
use crate::graph::{GraphModel, Position};
use crate::types::NodeId;

/// Verdict for a whole batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    /// Nothing worth persisting happened.
    Noop,
    /// At least one event must be persisted.
    Structural,
}

/// Classification of a single event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventClass {
    Noop,
    Structural,
    /// An intermediate drag frame. Counts as neither.
    Ignored,
}

#[derive(Debug, Clone, Copy)]
struct DragGesture {
    origin: Position,
    latest: Option<Position>,
}

#[derive(Debug, Default)]
pub struct ChangeClassifier {
    drags: HashMap<NodeId, DragGesture>,
}

impl ChangeClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Classify a batch against the model state before the batch.
    ///
    /// Every event is visited (no short-circuit) so that drag gestures are
    /// tracked even inside batches that are already structural.
    pub fn classify(&mut self, model: &GraphModel, batch: &[ChangeEvent]) -> Verdict {
        let mut verdict = Verdict::Noop;
        for event in batch {
            if self.classify_event(model, event) == EventClass::Structural {
                verdict = Verdict::Structural;
            }
        }
        verdict
    }

    pub fn classify_event(&mut self, model: &GraphModel, event: &ChangeEvent) -> EventClass {
        match event {
            ChangeEvent::Select { .. } => EventClass::Noop,

            ChangeEvent::PositionDrag {
                id,
                dragging: true,
                position,
            } => {
                if !self.drags.contains_key(id) {
                    let Some(node) = model.node(id) else {
                        tracing::debug!(node = %id, "Drag started on unknown node");
                        return EventClass::Structural;
                    };
                    self.drags.insert(
                        id.clone(),
                        DragGesture {
                            origin: node.position,
                            latest: None,
                        },
                    );
                }
                if let (Some(position), Some(gesture)) = (position, self.drags.get_mut(id)) {
                    gesture.latest = Some(*position);
                }
                EventClass::Ignored
            }

            ChangeEvent::PositionDrag {
                id,
                dragging: false,
                position,
            } => {
                let Some(gesture) = self.drags.remove(id) else {
                    tracing::debug!(node = %id, "Drag ended without a start frame");
                    return EventClass::Structural;
                };
                let resulting = position
                    .or(gesture.latest)
                    .or_else(|| model.node(id).map(|node| node.position));
                match resulting {
                    Some(end) if end == gesture.origin => EventClass::Noop,
                    _ => EventClass::Structural,
                }
            }

            ChangeEvent::Add { .. }
            | ChangeEvent::Remove { .. }
            | ChangeEvent::Connect { .. }
            | ChangeEvent::Disconnect { .. }
            | ChangeEvent::DataEdit { .. } => EventClass::Structural,
        }
    }

    /// Number of drag gestures that have started but not ended.
    pub fn drags_in_progress(&self) -> usize {
        self.drags.len()
    }

    /// Position `id` had before its open drag gesture started, if one is open.
    ///
    /// Saves taken mid-gesture persist this instead of the live position,
    /// so only the end frame ever decides where the node lands.
    pub fn drag_origin(&self, id: &str) -> Option<Position> {
        self.drags.get(id).map(|gesture| gesture.origin)
    }

    /// Forget all gesture origins, e.g. after the model was overwritten.
    pub fn reset(&mut self) {
        self.drags.clear();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
