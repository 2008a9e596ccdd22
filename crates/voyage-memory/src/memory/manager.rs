//! Per-session memory façade over the shared stores

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::embedding::EmbeddingProvider;
use crate::llm::LlmClient;
use crate::memory::consolidation::{ArchivedMemory, MemoryConsolidator};
use crate::memory::eviction::{EvictionConfig, EvictionManager, EvictionReport, EvictionSnapshot, EvictionStrategy};
use crate::memory::hierarchy::{HierarchicalMemoryStore, RetrievedContext, SessionData};
use crate::memory::importance::{ImportanceScore, ImportanceScorer};
use crate::memory::profile::{UserPreference, UserProfileStore};
use crate::memory::summarizer::{ConversationSummarizer, ConversationSummary};
use crate::memory::types::{MemoryItem, Message, Role};

/// Turns of preceding dialogue passed to the scorer as context
const SCORING_CONTEXT_TURNS: usize = 2;

/// Collaborators shared by every session
#[derive(Clone)]
pub struct MemoryServices {
    pub scorer: Arc<ImportanceScorer>,
    pub summarizer: Arc<ConversationSummarizer>,
    pub profiles: Arc<Mutex<UserProfileStore>>,
    pub archive: Arc<Mutex<HierarchicalMemoryStore>>,
    pub consolidator: Arc<Mutex<MemoryConsolidator>>,
    eviction: EvictionConfig,
}

impl MemoryServices {
    /// Build every store from config, opening snapshots where persistence is on
    pub fn from_config(
        config: &Config,
        llm: Option<Arc<dyn LlmClient>>,
        embedder: Option<Arc<dyn EmbeddingProvider>>,
    ) -> Self {
        let mut scorer = ImportanceScorer::new(config.scorer.clone());
        let mut summarizer = ConversationSummarizer::new(config.summarizer.clone());

        let profiles = match config.storage.profiles_path() {
            Some(path) => UserProfileStore::open(path),
            None => UserProfileStore::new(),
        };
        if !profiles.load_errors().is_empty() {
            warn!(
                "{} user profiles could not be loaded",
                profiles.load_errors().len()
            );
        }

        let mut archive = match config.storage.archive_path() {
            Some(path) => HierarchicalMemoryStore::open(config.archive.clone(), path),
            None => HierarchicalMemoryStore::new(config.archive.clone()),
        };
        if let Some(embedder) = embedder {
            if embedder.dimension() != config.embedding.dimension {
                warn!(
                    "Embedding provider dimension {} differs from configured {}",
                    embedder.dimension(),
                    config.embedding.dimension
                );
            }
            archive = archive.with_embedding(embedder);
        }

        let mut consolidator = match config.storage.consolidation_path() {
            Some(path) => MemoryConsolidator::open(config.consolidation.clone(), path),
            None => MemoryConsolidator::new(config.consolidation.clone()),
        };

        if let Some(llm) = llm {
            info!("Memory services using language model: {}", llm.name());
            scorer = scorer.with_llm(llm.clone());
            summarizer = summarizer.with_llm(llm.clone());
            consolidator = consolidator.with_llm(llm);
        }

        Self {
            scorer: Arc::new(scorer),
            summarizer: Arc::new(summarizer),
            profiles: Arc::new(Mutex::new(profiles)),
            archive: Arc::new(Mutex::new(archive)),
            consolidator: Arc::new(Mutex::new(consolidator)),
            eviction: config.eviction,
        }
    }

    /// Start a new session
    pub fn session(&self, session_id: impl Into<String>, user_id: Option<String>) -> MemoryManager {
        MemoryManager::new(
            self.clone(),
            session_id.into(),
            user_id,
            EvictionManager::new(self.eviction),
        )
    }

    /// Resume a session from a saved short-term snapshot and transcript
    pub fn resume(
        &self,
        session_id: impl Into<String>,
        user_id: Option<String>,
        snapshot: EvictionSnapshot,
        history: Vec<Message>,
    ) -> MemoryManager {
        let mut manager = MemoryManager::new(
            self.clone(),
            session_id.into(),
            user_id,
            EvictionManager::restore(snapshot),
        );
        manager.next_seq = history.len() as u64;
        manager.history = history;
        manager
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionStats {
    pub session_id: String,
    pub user_id: Option<String>,
    pub started_at: DateTime<Utc>,
    pub message_count: usize,
    pub short_term: EvictionReport,
}

/// Memory for one live conversation
///
/// Owns the transcript and the bounded short-term store; everything that
/// outlives the session goes through [`MemoryServices`].
pub struct MemoryManager {
    services: MemoryServices,
    session_id: String,
    user_id: Option<String>,
    started_at: DateTime<Utc>,
    history: Vec<Message>,
    short_term: EvictionManager,
    next_seq: u64,
}

impl MemoryManager {
    fn new(
        services: MemoryServices,
        session_id: String,
        user_id: Option<String>,
        short_term: EvictionManager,
    ) -> Self {
        debug!("Opening memory for session {}", session_id);
        Self {
            services,
            session_id,
            user_id,
            started_at: Utc::now(),
            history: Vec::new(),
            short_term,
            next_seq: 0,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    /// Record a dialogue turn, score it and keep it in short-term memory
    pub async fn add_message(&mut self, role: Role, content: &str) -> ImportanceScore {
        let context = self.scoring_context();
        let score = self.services.scorer.score(content, context.as_deref()).await;

        self.history.push(Message::new(role, content));
        self.next_seq += 1;
        let item = MemoryItem::new(
            format!("{}-{}", self.session_id, self.next_seq),
            content,
            score.total,
        )
        .with_metadata("role", json!(role.as_str()));

        if self.short_term.add(item) {
            debug!(
                "Short-term store for {} evicted to make room",
                self.session_id
            );
        }
        score
    }

    fn scoring_context(&self) -> Option<String> {
        if self.history.is_empty() {
            return None;
        }
        let skip = self.history.len().saturating_sub(SCORING_CONTEXT_TURNS);
        Some(
            self.history[skip..]
                .iter()
                .map(|m| format!("{}: {}", m.role, m.content))
                .collect::<Vec<_>>()
                .join("\n"),
        )
    }

    pub fn conversation_history(&self) -> &[Message] {
        &self.history
    }

    /// Newest `limit` short-term items, oldest first
    pub fn recent_memories(&self, limit: usize) -> Vec<MemoryItem> {
        self.short_term.get_recent(limit)
    }

    /// Transcript fitted into `max_messages` turns, or the configured budget
    pub async fn context_messages(&self, max_messages: Option<usize>) -> Vec<Message> {
        let max = max_messages.unwrap_or(self.services.summarizer.config().context_max_messages);
        self.services
            .summarizer
            .compress_for_context(&self.history, max)
            .await
    }

    /// Profile digest for prompt injection; `None` for anonymous sessions
    pub async fn user_context(&self) -> Option<String> {
        let user_id = self.user_id.as_deref()?;
        Some(self.services.profiles.lock().await.get_context_for_llm(user_id))
    }

    /// Archived sessions relevant to `query` for this session's user
    pub async fn retrieve(&self, query: &str, top_k: usize) -> Vec<RetrievedContext> {
        let Some(user_id) = self.user_id.as_deref() else {
            return Vec::new();
        };
        self.services
            .archive
            .lock()
            .await
            .retrieve_context(user_id, query, top_k)
            .await
    }

    pub fn set_strategy(&mut self, strategy: EvictionStrategy) {
        self.short_term.set_strategy(strategy);
    }

    /// Drop the transcript and short-term items; returns how many items went
    pub fn clear_conversation(&mut self, keep_high_importance: bool) -> usize {
        self.history.clear();
        self.short_term.clear(keep_high_importance).len()
    }

    /// Short-term store state for [`MemoryServices::resume`]
    pub fn short_term_snapshot(&self) -> EvictionSnapshot {
        self.short_term.snapshot()
    }

    /// Close the session
    ///
    /// Summarizes the transcript, merges learned preferences into the user's
    /// profile, archives the session and hands short-term items to the
    /// consolidator. An empty session is summarized but nothing is stored.
    pub async fn end_session(self) -> ConversationSummary {
        let level = self.services.summarizer.config().default_level;
        let summary = self.services.summarizer.summarize(&self.history, level).await;

        if self.history.is_empty() {
            info!("Session {} ended without dialogue", self.session_id);
            return summary;
        }

        if let Some(user_id) = &self.user_id {
            let mut profiles = self.services.profiles.lock().await;
            profiles.get_or_create(user_id);
            if !summary.user_preferences.is_empty() {
                profiles.merge_preferences(user_id, &UserPreference::from(&summary.user_preferences));
            }
        }

        let memories: Vec<ArchivedMemory> = self
            .short_term
            .get_all()
            .iter()
            .map(|item| ArchivedMemory::from_item(item, &self.session_id))
            .collect();

        let mut session = SessionData::new(self.session_id.clone(), self.user_id.clone())
            .with_start_time(self.started_at)
            .with_summary(summary.summary.clone(), summary.topics.clone())
            .with_preferences(summary.user_preferences.clone())
            .with_history(self.history);
        session.end_time = Some(Utc::now());
        self.services.archive.lock().await.store_session(session).await;

        let result = self
            .services
            .consolidator
            .lock()
            .await
            .consolidate(memories)
            .await;

        info!(
            "Session {} ended: {} messages archived, {} memories consolidated",
            self.session_id, summary.message_count_before, result.memories_consolidated
        );
        summary
    }

    pub fn stats(&self) -> SessionStats {
        SessionStats {
            session_id: self.session_id.clone(),
            user_id: self.user_id.clone(),
            started_at: self.started_at,
            message_count: self.history.len(),
            short_term: self.short_term.stats(),
        }
    }
}
