pub mod canvas;
pub mod change;
pub mod classifier;
pub mod error;
pub mod graph;
pub mod hydration;
pub mod save_state;
pub mod store;
pub mod types;
