/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Server-assigned graph version. Only a successful save or a hydration
/// from the server ever changes it locally.
pub type Version = u64;

/// Node identifiers are opaque strings chosen by the canvas.
pub type NodeId = String;

/// Edge identifiers are opaque strings chosen by the canvas.
pub type EdgeId = String;

/// Per-node configuration record.
pub type Config = serde_json::Map<String, serde_json::Value>;
