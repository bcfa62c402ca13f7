//! Canvas defaults and limits shared by the session and the server.
//!
//! Lives in `core` so that the engine (placing new nodes) and the API
//! (validating save payloads) agree on the same numbers.

use crate::error::CoreError;
use crate::graph::Position;

// ---------------------------------------------------------------------------
// Canvas defaults
// ---------------------------------------------------------------------------

/// Default node width in pixels.
pub const DEFAULT_NODE_WIDTH: u32 = 200;

/// Default node height in pixels.
pub const DEFAULT_NODE_HEIGHT: u32 = 100;

/// Spacing between auto-placed nodes (pixels).
pub const NODE_SPACING: u32 = 50;

/// Nodes per row when auto-placing.
pub const GRID_COLUMNS: usize = 4;

/// Maximum number of nodes allowed on a single canvas.
pub const MAX_NODES_PER_CANVAS: usize = 500;

// ---------------------------------------------------------------------------
// Placement
// ---------------------------------------------------------------------------

/// Grid slot for the `index`-th auto-placed node, filled row by row.
pub fn grid_position(index: usize) -> Position {
    let column = (index % GRID_COLUMNS) as f64;
    let row = (index / GRID_COLUMNS) as f64;
    Position::new(
        column * f64::from(DEFAULT_NODE_WIDTH + NODE_SPACING),
        row * f64::from(DEFAULT_NODE_HEIGHT + NODE_SPACING),
    )
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate that a node count does not exceed the canvas limit.
pub fn validate_node_count(count: usize) -> Result<(), CoreError> {
    if count > MAX_NODES_PER_CANVAS {
        Err(CoreError::Validation(format!(
            "Canvas has {count} nodes, exceeding the maximum of {MAX_NODES_PER_CANVAS}"
        )))
    } else {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
