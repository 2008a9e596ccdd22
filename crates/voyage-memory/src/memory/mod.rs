//! Memory components
//!
//! Short-term memory lives in a per-session [`EvictionManager`]; finished
//! sessions move into the [`HierarchicalMemoryStore`], preferences accumulate
//! in the [`UserProfileStore`] and archived memories are clustered by the
//! [`MemoryConsolidator`]. [`MemoryManager`] ties them together per session.

pub mod consolidation;
pub mod eviction;
pub mod hierarchy;
pub mod importance;
pub mod manager;
pub mod profile;
pub mod summarizer;
pub mod types;

pub use consolidation::{
    ArchivedMemory, ConsolidationConfig, ConsolidationResult, MemoryCluster, MemoryConsolidator,
};
pub use eviction::{EvictionConfig, EvictionManager, EvictionStrategy, PriorityCalculator};
pub use hierarchy::{
    ArchiveConfig, HierarchicalMemoryStore, RetrievedContext, SessionData, StorageTier,
};
pub use importance::{Dimension, ImportanceScore, ImportanceScorer, ScorerConfig};
pub use manager::{MemoryManager, MemoryServices};
pub use profile::{TravelHistory, UserPreference, UserProfile, UserProfileStore};
pub use summarizer::{CompressionLevel, ConversationSummarizer, ConversationSummary, SummarizerConfig};
pub use types::{MemoryItem, Message, Role, SessionPreferences};
