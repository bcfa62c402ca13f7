//! Shared response envelope types for API handlers.
//!
//! Successful responses use a `{ "data": ... }` envelope, which is what
//! `graphsync_gateway::HttpGateway` unwraps.

use serde::Serialize;

/// Standard `{ "data": T }` response envelope.
#[derive(Debug, Serialize)]
pub struct DataResponse<T: Serialize> {
    pub data: T,
}
