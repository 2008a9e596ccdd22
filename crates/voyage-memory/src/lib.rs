//! voyage-memory - Tiered conversational memory for a travel planning assistant
//!
//! Scores incoming messages, keeps a bounded short-term store, compresses
//! dialogue into summaries, archives finished sessions across hot/warm/cold
//! tiers, maintains long-lived user preference profiles and periodically
//! consolidates archived memories into topic clusters.

pub mod config;
pub mod embedding;
pub mod error;
pub mod llm;
pub mod memory;
pub mod storage;
pub mod testing;

pub use error::{Result, VoyageError};
