//! Snapshot persistence
//!
//! Each store serializes itself to a single JSON document keyed by file path.

pub mod snapshot;

pub use snapshot::{load_snapshot, save_snapshot};
