//! Sync event bus.
//!
//! - [`EventBus`]: in-process publish/subscribe hub backed by
//!   `tokio::sync::broadcast`.
//! - [`SyncEvent`]: envelope for save-state transitions, saves, conflicts,
//!   failures and hydrations of one graph session.

pub mod bus;

pub use bus::{EventBus, SyncEvent, SyncEventKind};
