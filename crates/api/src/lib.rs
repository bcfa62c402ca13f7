//! Reference graph server.
//!
//! Holds graphs in memory and serves the load/save contract spoken by
//! `graphsync_gateway::HttpGateway`, enforcing optimistic concurrency on
//! every save. Exposed as a library so integration tests and the binary
//! share the same router.

pub mod config;
pub mod error;
pub mod handlers;
pub mod response;
pub mod router;
pub mod routes;
pub mod state;
