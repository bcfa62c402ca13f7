//! Save lifecycle state exposed to the UI.

use serde::{Deserialize, Serialize};

use crate::graph::GraphSnapshot;
use crate::types::Timestamp;

/// Where the local graph stands relative to the server.
///
/// ```text
/// idle ──structural──▶ dirty ──timer──▶ saving ──▶ saved | conflict | error
///   ▲                    ▲                              │
///   └── refresh ─────────┴──────── structural / retry ──┘
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SaveState {
    #[default]
    Idle,
    Dirty,
    Saving,
    Saved,
    Conflict,
    Error,
}

impl SaveState {
    pub fn as_str(self) -> &'static str {
        match self {
            SaveState::Idle => "idle",
            SaveState::Dirty => "dirty",
            SaveState::Saving => "saving",
            SaveState::Saved => "saved",
            SaveState::Conflict => "conflict",
            SaveState::Error => "error",
        }
    }

    /// `dirty` re-arms from any state except mid-flight `saving`.
    pub fn can_mark_dirty(self) -> bool {
        self != SaveState::Saving
    }
}

impl std::fmt::Display for SaveState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The server's copy after a rejected save. Kept until the user explicitly
/// refreshes from it; never applied automatically.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictRecord {
    pub current_server_snapshot: GraphSnapshot,
    pub detected_at: Timestamp,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_idle() {
        assert_eq!(SaveState::default(), SaveState::Idle);
    }

    #[test]
    fn serializes_snake_case() {
        assert_eq!(serde_json::to_value(SaveState::Conflict).unwrap(), "conflict");
        assert_eq!(SaveState::Saving.to_string(), "saving");
    }

    #[test]
    fn only_saving_blocks_dirty() {
        for state in [
            SaveState::Idle,
            SaveState::Dirty,
            SaveState::Saved,
            SaveState::Conflict,
            SaveState::Error,
        ] {
            assert!(state.can_mark_dirty(), "{state}");
        }
        assert!(!SaveState::Saving.can_mark_dirty());
    }
}
