//! Graph sync engine.
//!
//! - [`DirtyScheduler`]: debounce state machine deciding when to save.
//! - [`ConflictResolver`]: save-outcome interpretation and the save state.
//! - [`SyncSession`]: the actor that ties classifier, scheduler, resolver
//!   and hydration guard to a [`PersistenceGateway`], driven through a
//!   [`SessionHandle`].
//!
//! [`PersistenceGateway`]: graphsync_gateway::PersistenceGateway

pub mod config;
pub mod resolver;
pub mod scheduler;
pub mod session;

pub use config::{ConfigError, SyncConfig};
pub use resolver::{ConflictResolver, Settlement};
pub use scheduler::{DirtyScheduler, TimerOutcome};
pub use session::{SessionHandle, SessionView, SyncSession};

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The session task has stopped.
    #[error("Sync session is closed")]
    Closed,

    #[error("Invalid sync configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Gateway setup failed: {0}")]
    Gateway(#[from] graphsync_gateway::GatewayError),
}
