//! Save outcome interpretation and conflict bookkeeping.
//!
//! [`ConflictResolver`] owns the [`SaveState`] machine. It prepares the
//! payload when a save starts and, when it settles, decides what the
//! outcome means for the local model:
//!
//! - saved: the ack's version and timestamp are applied. This is the only
//!   path by which the local version moves forward on its own.
//! - conflict: the server copy is parked in a [`ConflictRecord`] and the
//!   local model is left alone until the user refreshes from it.
//! - transport failure: state `error`, local content untouched.

use graphsync_core::graph::{GraphModel, Position, SaveAck, SavePayload};
use graphsync_core::save_state::{ConflictRecord, SaveState};
use graphsync_core::types::Version;
use graphsync_gateway::{PersistenceGateway, SaveOutcome};

/// What a settled save did.
#[derive(Debug, Clone, PartialEq)]
pub enum Settlement {
    /// Accepted. `revision` is the model revision the payload was taken at.
    Saved { ack: SaveAck, revision: u64 },
    Conflict { local_version: Version, server_version: Version },
    Failed(String),
}

#[derive(Debug, Clone, Copy)]
struct InFlight {
    revision: u64,
    version: Version,
}

#[derive(Debug, Default)]
pub struct ConflictResolver {
    state: SaveState,
    conflict: Option<ConflictRecord>,
    in_flight: Option<InFlight>,
    last_error: Option<String>,
}

impl ConflictResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> SaveState {
        self.state
    }

    pub fn conflict(&self) -> Option<&ConflictRecord> {
        self.conflict.as_ref()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Enter `dirty` unless a save is mid-flight. Returns whether it did.
    pub fn mark_dirty(&mut self) -> bool {
        if !self.state.can_mark_dirty() {
            return false;
        }
        self.state = SaveState::Dirty;
        true
    }

    /// Enter `saving` and serialize the model as it is right now.
    pub fn begin_save(&mut self, model: &GraphModel) -> SavePayload {
        self.begin_save_pinned(model, |_| None)
    }

    /// [`begin_save`](Self::begin_save) with some node positions held at
    /// `pinned` (the origins of drags still in progress).
    pub fn begin_save_pinned<F>(&mut self, model: &GraphModel, pinned: F) -> SavePayload
    where
        F: Fn(&str) -> Option<Position>,
    {
        self.state = SaveState::Saving;
        self.in_flight = Some(InFlight {
            revision: model.revision(),
            version: model.version(),
        });
        model.save_payload_pinned(pinned)
    }

    pub fn settle(&mut self, outcome: SaveOutcome, model: &mut GraphModel) -> Settlement {
        let flight = self.in_flight.take().unwrap_or(InFlight {
            revision: model.revision(),
            version: model.version(),
        });

        match outcome {
            SaveOutcome::Saved(ack) => {
                model.apply_ack(ack);
                self.last_error = None;
                // Edits that landed during the flight are not in this save.
                self.state = if model.revision() == flight.revision {
                    SaveState::Saved
                } else {
                    SaveState::Dirty
                };
                tracing::info!(graph = %model.name(), version = ack.version, "Graph saved");
                Settlement::Saved {
                    ack,
                    revision: flight.revision,
                }
            }
            SaveOutcome::Conflict { current } => {
                let server_version = current.version;
                tracing::info!(
                    graph = %model.name(),
                    local_version = flight.version,
                    server_version,
                    "Save rejected with version conflict",
                );
                self.conflict = Some(ConflictRecord {
                    current_server_snapshot: current,
                    detected_at: chrono::Utc::now(),
                });
                self.state = SaveState::Conflict;
                Settlement::Conflict {
                    local_version: flight.version,
                    server_version,
                }
            }
            SaveOutcome::TransportError(e) => {
                tracing::warn!(graph = %model.name(), error = %e, "Save failed, keeping local changes");
                let message = e.to_string();
                self.last_error = Some(message.clone());
                self.state = SaveState::Error;
                Settlement::Failed(message)
            }
        }
    }

    /// Overwrite the whole model with the parked server snapshot.
    ///
    /// Returns the adopted version, or `None` when there is no conflict.
    pub fn refresh_from_conflict(&mut self, model: &mut GraphModel) -> Option<Version> {
        let record = self.conflict.take()?;
        let version = record.current_server_snapshot.version;
        model.replace(record.current_server_snapshot);
        self.state = SaveState::Idle;
        self.last_error = None;
        tracing::info!(graph = %model.name(), version, "Local graph replaced from conflict");
        Some(version)
    }

    /// Replace the parked snapshot with a newer server copy.
    pub fn update_conflict(&mut self, record: ConflictRecord) {
        self.conflict = Some(record);
    }

    /// Settle a leftover `dirty` as `saved` once the caller knows the edits
    /// made during the last flight were all cosmetic.
    pub fn confirm_saved(&mut self) {
        if self.state == SaveState::Dirty {
            self.state = SaveState::Saved;
        }
    }

    /// Clean state after a hydration that left nothing unsaved.
    pub fn reset_idle(&mut self) {
        self.state = SaveState::Idle;
        self.last_error = None;
    }

    /// Record a failure that did not come from a save (e.g. the initial load).
    pub fn record_error(&mut self, message: impl Into<String>) {
        self.last_error = Some(message.into());
        self.state = SaveState::Error;
    }

    /// One full save round-trip without a scheduler.
    pub async fn save_now(&mut self, gateway: &dyn PersistenceGateway, model: &mut GraphModel) -> Settlement {
        let payload = self.begin_save(model);
        let outcome = gateway.save(payload).await;
        self.settle(outcome, model)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
