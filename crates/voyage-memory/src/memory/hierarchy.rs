//! Tiered session archive
//!
//! Sessions live in exactly one of two owning tiers:
//! - HOT: recently stored or read sessions, bounded, least-recently-used first out
//! - COLD: everything demoted or migrated out of HOT, unbounded
//!
//! WARM is an index from user id to session ids. It holds references only,
//! so a session demoted by HOT overflow stays reachable per user while one
//! explicitly migrated to COLD drops out of the user index.

use chrono::{DateTime, Utc};
use lru::LruCache;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::embedding::{EmbeddingProvider, cosine_similarity};
use crate::memory::types::{Message, SessionPreferences};
use crate::storage::{load_snapshot, save_snapshot};

/// Words that make a budget-bearing session relevant
const BUDGET_QUERY_WORDS: &[&str] = &["预算", "钱", "花费", "元"];
/// Minimum relevance for an unindexed COLD session to be returned
const COLD_RELEVANCE_FLOOR: f32 = 0.1;

fn default_hot_cache_size() -> usize {
    100
}

fn default_top_k() -> usize {
    3
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveConfig {
    /// HOT tier capacity
    #[serde(default = "default_hot_cache_size")]
    pub hot_cache_size: usize,
    /// Index session embeddings when a provider is available
    #[serde(default)]
    pub enable_vector_search: bool,
    #[serde(default = "default_top_k")]
    pub default_top_k: usize,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            hot_cache_size: default_hot_cache_size(),
            enable_vector_search: false,
            default_top_k: default_top_k(),
        }
    }
}

/// A finished conversation as archived
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionData {
    pub session_id: String,
    #[serde(default)]
    pub user_id: Option<String>,
    pub start_time: DateTime<Utc>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub message_count: usize,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub user_preferences: SessionPreferences,
    #[serde(default)]
    pub full_history: Vec<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
}

impl SessionData {
    pub fn new(session_id: impl Into<String>, user_id: Option<String>) -> Self {
        Self {
            session_id: session_id.into(),
            user_id,
            start_time: Utc::now(),
            end_time: None,
            message_count: 0,
            summary: String::new(),
            topics: Vec::new(),
            user_preferences: SessionPreferences::default(),
            full_history: Vec::new(),
            embedding: None,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_summary(mut self, summary: impl Into<String>, topics: Vec<String>) -> Self {
        self.summary = summary.into();
        self.topics = topics;
        self
    }

    pub fn with_history(mut self, history: Vec<Message>) -> Self {
        self.message_count = history.len();
        self.full_history = history;
        self
    }

    pub fn with_preferences(mut self, preferences: SessionPreferences) -> Self {
        self.user_preferences = preferences;
        self
    }

    pub fn with_start_time(mut self, start_time: DateTime<Utc>) -> Self {
        self.start_time = start_time;
        self
    }

    fn belongs_to(&self, user_id: &str) -> bool {
        self.user_id.as_deref() == Some(user_id)
    }

    /// Text indexed for vector search
    fn embedding_text(&self) -> String {
        if self.topics.is_empty() {
            self.summary.clone()
        } else {
            format!("{} {}", self.summary, self.topics.join(" "))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageTier {
    Hot,
    Warm,
    Cold,
}

impl StorageTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageTier::Hot => "hot",
            StorageTier::Warm => "warm",
            StorageTier::Cold => "cold",
        }
    }
}

impl fmt::Display for StorageTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A session returned by retrieval with its ranking
#[derive(Debug, Clone)]
pub struct RetrievedContext {
    pub session: SessionData,
    pub relevance: f32,
    /// Tier the session was found through
    pub tier: StorageTier,
    pub match_reason: &'static str,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArchiveCounters {
    pub sessions_stored: u64,
    pub hot_hits: u64,
    pub warm_hits: u64,
    pub cold_hits: u64,
    pub tier_migrations: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArchiveStats {
    pub total_sessions: usize,
    pub hot_sessions: usize,
    pub warm_users: usize,
    pub cold_sessions: usize,
    pub vector_index_size: usize,
    pub vector_search_enabled: bool,
    pub counters: ArchiveCounters,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ArchiveSnapshot {
    /// Least recently used first
    #[serde(default)]
    hot: Vec<SessionData>,
    #[serde(default)]
    cold: BTreeMap<String, SessionData>,
    #[serde(default)]
    warm: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    vector_index: BTreeMap<String, Vec<f32>>,
    #[serde(default)]
    counters: ArchiveCounters,
}

/// Relevance of a session to a free-text query, in [0, 1]
pub fn session_relevance(session: &SessionData, query: &str) -> f32 {
    let query = query.to_lowercase();
    let mut relevance = 0.0;

    relevance += 0.3
        * session
            .topics
            .iter()
            .filter(|t| !t.is_empty() && query.contains(&t.to_lowercase()))
            .count() as f32;

    let summary = session.summary.to_lowercase();
    relevance += 0.1
        * query
            .split_whitespace()
            .filter(|word| summary.contains(word))
            .count() as f32;

    relevance += 0.2
        * session
            .user_preferences
            .interest_tags
            .iter()
            .filter(|t| !t.is_empty() && query.contains(&t.to_lowercase()))
            .count() as f32;

    if session.user_preferences.budget.is_some()
        && BUDGET_QUERY_WORDS.iter().any(|w| query.contains(w))
    {
        relevance += 0.1;
    }

    relevance.min(1.0)
}

/// Hot/warm/cold archive of finished sessions
pub struct HierarchicalMemoryStore {
    config: ArchiveConfig,
    hot: LruCache<String, SessionData>,
    warm: BTreeMap<String, Vec<String>>,
    cold: BTreeMap<String, SessionData>,
    vector_index: HashMap<String, Vec<f32>>,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    storage_path: Option<PathBuf>,
    counters: ArchiveCounters,
}

impl fmt::Debug for HierarchicalMemoryStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HierarchicalMemoryStore")
            .field("hot", &self.hot.len())
            .field("warm_users", &self.warm.len())
            .field("cold", &self.cold.len())
            .field("vector_search", &self.vector_search_active())
            .finish()
    }
}

impl HierarchicalMemoryStore {
    pub fn new(config: ArchiveConfig) -> Self {
        Self {
            config,
            hot: LruCache::unbounded(),
            warm: BTreeMap::new(),
            cold: BTreeMap::new(),
            vector_index: HashMap::new(),
            embedder: None,
            storage_path: None,
            counters: ArchiveCounters::default(),
        }
    }

    /// Store persisted at `path`, loading any existing snapshot best-effort
    pub fn open(config: ArchiveConfig, path: impl Into<PathBuf>) -> Self {
        let mut store = Self::new(config);
        store.storage_path = Some(path.into());
        store.load();
        store
    }

    /// Attach an embedding provider; only used when vector search is enabled
    pub fn with_embedding(mut self, provider: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedder = Some(provider);
        self
    }

    pub fn config(&self) -> &ArchiveConfig {
        &self.config
    }

    fn vector_search_active(&self) -> bool {
        self.config.enable_vector_search && self.embedder.is_some()
    }

    /// Archive a session in HOT and index it by user
    ///
    /// A session already archived under the same id is replaced wherever it
    /// lives. Overflowing HOT demotes its least-recently-used sessions to COLD.
    pub async fn store_session(&mut self, session: SessionData) {
        let session_id = session.session_id.clone();

        if self.vector_search_active() {
            match session.embedding.clone() {
                Some(vector) => {
                    self.vector_index.insert(session_id.clone(), vector);
                }
                None => self.index_embedding(&session).await,
            }
        }

        self.cold.remove(&session_id);
        self.unindex(&session_id);
        if let Some(user_id) = &session.user_id {
            self.warm
                .entry(user_id.clone())
                .or_default()
                .push(session_id.clone());
        }

        self.hot.push(session_id.clone(), session);
        self.counters.sessions_stored += 1;
        self.enforce_hot_capacity();
        self.save();

        debug!("Stored session {} in HOT tier", session_id);
    }

    async fn index_embedding(&mut self, session: &SessionData) {
        let Some(embedder) = self.embedder.clone() else {
            return;
        };
        match embedder.encode(&session.embedding_text()).await {
            Ok(vector) => {
                self.vector_index.insert(session.session_id.clone(), vector);
            }
            Err(e) => warn!(
                "Failed to embed session {}, skipping vector index: {}",
                session.session_id, e
            ),
        }
    }

    fn enforce_hot_capacity(&mut self) {
        while self.hot.len() > self.config.hot_cache_size {
            let Some((session_id, session)) = self.hot.pop_lru() else {
                break;
            };
            debug!("HOT tier full, demoting session {} to COLD", session_id);
            self.cold.insert(session_id, session);
            self.counters.tier_migrations += 1;
        }
    }

    /// Drop `session_id` from every user's index entry
    fn unindex(&mut self, session_id: &str) {
        self.warm.retain(|_, ids| {
            ids.retain(|id| id != session_id);
            !ids.is_empty()
        });
    }

    /// Move a HOT session to COLD and remove it from the user index
    ///
    /// Returns `false` when the session is not currently in HOT.
    pub fn migrate_to_cold(&mut self, session_id: &str) -> bool {
        let Some(session) = self.hot.pop(session_id) else {
            return false;
        };

        self.unindex(session_id);
        self.cold.insert(session_id.to_string(), session);
        self.counters.tier_migrations += 1;
        self.save();

        debug!("Migrated session {} to COLD tier", session_id);
        true
    }

    /// Sessions most relevant to `query` for `user_id`, best first
    pub async fn retrieve_context(
        &mut self,
        user_id: &str,
        query: &str,
        top_k: usize,
    ) -> Vec<RetrievedContext> {
        let mut results: Vec<RetrievedContext> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();

        for (session_id, session) in self.hot.iter() {
            if !session.belongs_to(user_id) {
                continue;
            }
            seen.insert(session_id.clone());
            results.push(RetrievedContext {
                relevance: session_relevance(session, query),
                session: session.clone(),
                tier: StorageTier::Hot,
                match_reason: "热点缓存命中",
            });
            self.counters.hot_hits += 1;
        }

        if let Some(ids) = self.warm.get(user_id) {
            for session_id in ids {
                if seen.contains(session_id) {
                    continue;
                }
                let Some(session) = self.peek(session_id) else {
                    continue;
                };
                seen.insert(session_id.clone());
                results.push(RetrievedContext {
                    relevance: session_relevance(session, query),
                    session: session.clone(),
                    tier: StorageTier::Warm,
                    match_reason: "用户历史会话",
                });
                self.counters.warm_hits += 1;
            }
        }

        for (session_id, session) in &self.cold {
            if seen.contains(session_id) {
                continue;
            }
            let relevance = session_relevance(session, query);
            if relevance > COLD_RELEVANCE_FLOOR {
                seen.insert(session_id.clone());
                results.push(RetrievedContext {
                    relevance,
                    session: session.clone(),
                    tier: StorageTier::Cold,
                    match_reason: "历史会话匹配",
                });
                self.counters.cold_hits += 1;
            }
        }

        for hit in self.vector_search(query, top_k).await {
            if seen.insert(hit.session.session_id.clone()) {
                results.push(hit);
            }
        }

        results.sort_by(|a, b| b.relevance.total_cmp(&a.relevance));
        results.truncate(top_k);
        results
    }

    async fn vector_search(&self, query: &str, top_k: usize) -> Vec<RetrievedContext> {
        if !self.vector_search_active() || self.vector_index.is_empty() {
            return Vec::new();
        }
        let Some(embedder) = &self.embedder else {
            return Vec::new();
        };

        let query_vector = match embedder.encode(query).await {
            Ok(v) => v,
            Err(e) => {
                warn!("Query embedding failed, skipping vector search: {}", e);
                return Vec::new();
            }
        };

        let mut scored: Vec<(&String, f32)> = self
            .vector_index
            .iter()
            .map(|(id, v)| (id, cosine_similarity(&query_vector, v)))
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(b.0)));

        scored
            .into_iter()
            .take(top_k)
            .filter_map(|(id, similarity)| {
                let session = self.peek(id)?;
                Some(RetrievedContext {
                    session: session.clone(),
                    relevance: similarity.clamp(0.0, 1.0),
                    tier: self.tier_of(id)?,
                    match_reason: "向量相似度匹配",
                })
            })
            .collect()
    }

    fn peek(&self, session_id: &str) -> Option<&SessionData> {
        self.hot.peek(session_id).or_else(|| self.cold.get(session_id))
    }

    /// Look a session up in any tier; a HOT hit refreshes its recency
    pub fn get_session(&mut self, session_id: &str) -> Option<SessionData> {
        if let Some(session) = self.hot.get(session_id) {
            return Some(session.clone());
        }
        self.cold.get(session_id).cloned()
    }

    /// A user's sessions across all tiers, newest first
    pub fn get_user_sessions(&self, user_id: &str, limit: usize) -> Vec<SessionData> {
        let mut sessions: Vec<&SessionData> = self
            .hot
            .iter()
            .map(|(_, s)| s)
            .chain(self.cold.values())
            .filter(|s| s.belongs_to(user_id))
            .collect();
        sessions.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        sessions.into_iter().take(limit).cloned().collect()
    }

    pub fn delete_session(&mut self, session_id: &str) -> bool {
        let in_hot = self.hot.pop(session_id).is_some();
        let in_cold = self.cold.remove(session_id).is_some();
        self.unindex(session_id);
        self.vector_index.remove(session_id);

        let deleted = in_hot || in_cold;
        if deleted {
            self.save();
        }
        deleted
    }

    /// Remove every session of a user; returns how many were removed
    pub fn clear_user_data(&mut self, user_id: &str) -> usize {
        let hot_ids: Vec<String> = self
            .hot
            .iter()
            .filter(|(_, s)| s.belongs_to(user_id))
            .map(|(id, _)| id.clone())
            .collect();
        for id in &hot_ids {
            self.hot.pop(id);
        }

        let cold_ids: Vec<String> = self
            .cold
            .iter()
            .filter(|(_, s)| s.belongs_to(user_id))
            .map(|(id, _)| id.clone())
            .collect();
        for id in &cold_ids {
            self.cold.remove(id);
        }

        self.warm.remove(user_id);
        for id in hot_ids.iter().chain(&cold_ids) {
            self.vector_index.remove(id);
        }

        let count = hot_ids.len() + cold_ids.len();
        if count > 0 {
            info!("Cleared {} archived sessions for user {}", count, user_id);
            self.save();
        }
        count
    }

    /// HOT session ids, most recently used first
    pub fn hot_keys(&self) -> Vec<String> {
        self.hot.iter().map(|(id, _)| id.clone()).collect()
    }

    /// Owning tier of a session
    pub fn tier_of(&self, session_id: &str) -> Option<StorageTier> {
        if self.hot.contains(session_id) {
            Some(StorageTier::Hot)
        } else if self.cold.contains_key(session_id) {
            Some(StorageTier::Cold)
        } else {
            None
        }
    }

    pub fn stats(&self) -> ArchiveStats {
        ArchiveStats {
            total_sessions: self.hot.len() + self.cold.len(),
            hot_sessions: self.hot.len(),
            warm_users: self.warm.len(),
            cold_sessions: self.cold.len(),
            vector_index_size: self.vector_index.len(),
            vector_search_enabled: self.vector_search_active(),
            counters: self.counters.clone(),
        }
    }

    /// Turn on vector search and index every archived session lacking a vector
    pub async fn enable_vector_search(&mut self, provider: Arc<dyn EmbeddingProvider>) {
        self.config.enable_vector_search = true;
        self.embedder = Some(provider);

        let pending: Vec<SessionData> = self
            .hot
            .iter()
            .map(|(_, s)| s)
            .chain(self.cold.values())
            .filter(|s| !self.vector_index.contains_key(&s.session_id))
            .cloned()
            .collect();

        for session in &pending {
            match &session.embedding {
                Some(vector) => {
                    self.vector_index
                        .insert(session.session_id.clone(), vector.clone());
                }
                None => self.index_embedding(session).await,
            }
        }

        info!(
            "Vector search enabled, {} sessions indexed",
            self.vector_index.len()
        );
        self.save();
    }

    fn save(&self) {
        let Some(path) = &self.storage_path else {
            return;
        };

        // LruCache iterates most recent first; store oldest first for replay
        let mut hot: Vec<SessionData> = self.hot.iter().map(|(_, s)| s.clone()).collect();
        hot.reverse();

        let snapshot = ArchiveSnapshot {
            hot,
            cold: self.cold.clone(),
            warm: self.warm.clone(),
            vector_index: self
                .vector_index
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            counters: self.counters.clone(),
        };

        if let Err(e) = save_snapshot(path, &snapshot) {
            error!("Failed to save session archive: {}", e);
        }
    }

    fn load(&mut self) {
        let Some(path) = self.storage_path.clone() else {
            return;
        };

        let snapshot: ArchiveSnapshot = match load_snapshot(&path) {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => {
                info!("No archive snapshot at {}, starting empty", path.display());
                return;
            }
            Err(e) => {
                error!("Failed to load session archive: {}", e);
                return;
            }
        };

        self.cold = snapshot.cold;
        for session in snapshot.hot {
            self.cold.remove(&session.session_id);
            self.hot.push(session.session_id.clone(), session);
        }
        self.enforce_hot_capacity();

        let known: HashSet<&String> = self
            .hot
            .iter()
            .map(|(id, _)| id)
            .chain(self.cold.keys())
            .collect();
        self.warm = snapshot
            .warm
            .into_iter()
            .map(|(user, ids)| {
                let ids: Vec<String> = ids.into_iter().filter(|id| known.contains(id)).collect();
                (user, ids)
            })
            .filter(|(_, ids)| !ids.is_empty())
            .collect();
        self.vector_index = snapshot
            .vector_index
            .into_iter()
            .filter(|(id, _)| known.contains(id))
            .collect();
        self.counters = snapshot.counters;

        info!(
            "Loaded session archive: {} hot, {} cold",
            self.hot.len(),
            self.cold.len()
        );
    }
}
