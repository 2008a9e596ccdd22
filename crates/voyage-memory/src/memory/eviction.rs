//! Capacity-bounded short-term store with pluggable eviction
//!
//! Items are kept in insertion order. Once the store holds `max_size` items,
//! every new insert first evicts one existing item: the least important item
//! below `min_importance` when there is one, otherwise the victim chosen by
//! the active [`EvictionStrategy`]. The strategy can be swapped at runtime.

use chrono::{DateTime, Duration, Utc};
use lru::LruCache;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::str::FromStr;
use tracing::{debug, info, warn};

use crate::error::{Result, VoyageError};
use crate::memory::types::MemoryItem;

const REASON_LOW_IMPORTANCE: &str = "low_importance";
const REASON_STRATEGY: &str = "strategy";

/// Victim selection policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvictionStrategy {
    /// Oldest creation time
    Fifo,
    /// Fewest accesses
    Lfu,
    /// Least recently accessed
    Lru,
    /// Lowest importance
    Priority,
    /// Weighted importance, recency and frequency
    Hybrid,
    /// LRU when recent activity dominates, otherwise LFU
    Adaptive,
}

impl EvictionStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            EvictionStrategy::Fifo => "fifo",
            EvictionStrategy::Lfu => "lfu",
            EvictionStrategy::Lru => "lru",
            EvictionStrategy::Priority => "priority",
            EvictionStrategy::Hybrid => "hybrid",
            EvictionStrategy::Adaptive => "adaptive",
        }
    }
}

impl fmt::Display for EvictionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EvictionStrategy {
    type Err = VoyageError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "fifo" => Ok(EvictionStrategy::Fifo),
            "lfu" => Ok(EvictionStrategy::Lfu),
            "lru" => Ok(EvictionStrategy::Lru),
            "priority" => Ok(EvictionStrategy::Priority),
            "hybrid" => Ok(EvictionStrategy::Hybrid),
            "adaptive" => Ok(EvictionStrategy::Adaptive),
            other => Err(VoyageError::Config(format!(
                "Unknown eviction strategy: {other}"
            ))),
        }
    }
}

/// Configuration for eviction behavior
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EvictionConfig {
    /// Logical capacity; inserts beyond this evict first (default: 20)
    #[serde(default = "default_max_size")]
    pub max_size: usize,
    /// Items below this importance are evicted before any strategy applies (default: 0.3)
    #[serde(default = "default_min_importance")]
    pub min_importance: f32,
    /// Headroom over `max_size` for the physical ceiling (default: 0.2)
    #[serde(default = "default_buffer_ratio")]
    pub buffer_ratio: f32,
    /// Initial strategy (default: hybrid)
    #[serde(default = "default_strategy")]
    pub strategy: EvictionStrategy,
}

impl Default for EvictionConfig {
    fn default() -> Self {
        Self {
            max_size: default_max_size(),
            min_importance: default_min_importance(),
            buffer_ratio: default_buffer_ratio(),
            strategy: default_strategy(),
        }
    }
}

impl EvictionConfig {
    pub fn new(
        max_size: usize,
        min_importance: f32,
        buffer_ratio: f32,
        strategy: EvictionStrategy,
    ) -> Self {
        Self {
            max_size,
            min_importance,
            buffer_ratio,
            strategy,
        }
    }

    /// Hard physical ceiling: `floor(max_size * (1 + buffer_ratio))`
    pub fn physical_capacity(&self) -> usize {
        let ceiling = (self.max_size as f64 * (1.0 + self.buffer_ratio.max(0.0) as f64)).floor();
        (ceiling as usize).max(self.max_size)
    }
}

fn default_max_size() -> usize {
    20
}

fn default_min_importance() -> f32 {
    0.3
}

fn default_buffer_ratio() -> f32 {
    0.2
}

fn default_strategy() -> EvictionStrategy {
    EvictionStrategy::Hybrid
}

/// Running eviction counters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvictionStats {
    pub total_evictions: u64,
    #[serde(default)]
    pub eviction_reasons: BTreeMap<String, u64>,
}

impl EvictionStats {
    fn record(&mut self, reason: &str) {
        self.total_evictions += 1;
        *self.eviction_reasons.entry(reason.to_string()).or_insert(0) += 1;
    }
}

/// Point-in-time view of the store
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvictionReport {
    pub current_size: usize,
    pub max_size: usize,
    pub physical_capacity: usize,
    pub current_strategy: EvictionStrategy,
    pub total_evictions: u64,
    pub eviction_reasons: BTreeMap<String, u64>,
    /// Item counts keyed by importance rounded to one decimal
    pub priority_distribution: BTreeMap<String, usize>,
}

/// Serializable state: config, items oldest first, counters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvictionSnapshot {
    pub config: EvictionConfig,
    pub items: Vec<MemoryItem>,
    #[serde(default)]
    pub stats: EvictionStats,
}

/// Callback invoked with `(old, new)` when the strategy changes
pub type StrategyListener = Box<dyn Fn(EvictionStrategy, EvictionStrategy) + Send + Sync>;

/// Short-term memory store with eviction
pub struct EvictionManager {
    config: EvictionConfig,
    strategy: EvictionStrategy,
    /// Insertion-ordered; reads use `peek` so order never changes after insert
    items: LruCache<String, MemoryItem>,
    stats: EvictionStats,
    listeners: Vec<StrategyListener>,
}

impl EvictionManager {
    pub fn new(config: EvictionConfig) -> Self {
        Self {
            strategy: config.strategy,
            config,
            items: LruCache::unbounded(),
            stats: EvictionStats::default(),
            listeners: Vec::new(),
        }
    }

    pub fn config(&self) -> &EvictionConfig {
        &self.config
    }

    pub fn strategy(&self) -> EvictionStrategy {
        self.strategy
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.items.contains(id)
    }

    /// Insert an item, evicting first when at capacity
    ///
    /// Re-adding an id already present replaces that entry in place.
    ///
    /// # Returns
    ///
    /// `true` if an existing item was evicted to make room.
    pub fn add(&mut self, mut item: MemoryItem) -> bool {
        let previous = self.items.peek(&item.id).map(|i| i.access_count).unwrap_or(0);
        item.access_count = previous.saturating_add(1);
        item.last_accessed = Utc::now();

        if let Some(slot) = self.items.peek_mut(&item.id) {
            *slot = item;
            return false;
        }

        let mut evicted = false;
        if self.items.len() >= self.config.max_size {
            evicted = self.evict_low_importance() || self.evict_by_strategy();
        }
        while self.items.len() >= self.config.physical_capacity() {
            if !self.evict_by_strategy() {
                break;
            }
            evicted = true;
        }

        self.items.push(item.id.clone(), item);
        evicted
    }

    /// Fetch an item, recording the access
    pub fn get(&mut self, id: &str) -> Option<MemoryItem> {
        let item = self.items.peek_mut(id)?;
        item.touch();
        Some(item.clone())
    }

    /// Record an access without cloning the item
    pub fn access(&mut self, id: &str) -> bool {
        match self.items.peek_mut(id) {
            Some(item) => {
                item.touch();
                debug!("Accessed memory {}", id);
                true
            }
            None => false,
        }
    }

    /// Read without touching access bookkeeping
    pub fn peek(&self, id: &str) -> Option<&MemoryItem> {
        self.items.peek(id)
    }

    /// The last `limit` items added, oldest first
    pub fn get_recent(&self, limit: usize) -> Vec<MemoryItem> {
        let mut recent: Vec<MemoryItem> = self.items.iter().take(limit).map(|(_, v)| v.clone()).collect();
        recent.reverse();
        recent
    }

    /// All items, oldest first
    pub fn get_all(&self) -> Vec<MemoryItem> {
        self.oldest_first().cloned().collect()
    }

    pub fn update_importance(&mut self, id: &str, importance: f32) -> bool {
        match self.items.peek_mut(id) {
            Some(item) => {
                let old = item.importance;
                item.set_importance(importance);
                debug!("Updated importance of {} ({:.2} -> {:.2})", id, old, item.importance);
                true
            }
            None => false,
        }
    }

    /// Whether the next insert of a new id would trigger an eviction
    pub fn should_evict(&self) -> bool {
        self.items.len() >= self.config.max_size
    }

    /// Up to `count` items in the order they would be evicted
    pub fn eviction_candidates(&self, count: usize) -> Vec<MemoryItem> {
        let now = Utc::now();
        let strategy = self.effective_strategy(now);
        let mut ranked: Vec<&MemoryItem> = self.oldest_first().collect();
        ranked.sort_by(|a, b| self.compare_for_eviction(strategy, now, a, b));
        ranked.into_iter().take(count).cloned().collect()
    }

    /// Remove everything, or only items below `min_importance`
    pub fn clear(&mut self, keep_high_importance: bool) -> Vec<MemoryItem> {
        let doomed: Vec<String> = self
            .oldest_first()
            .filter(|i| !keep_high_importance || i.importance < self.config.min_importance)
            .map(|i| i.id.clone())
            .collect();

        let removed: Vec<MemoryItem> = doomed.iter().filter_map(|id| self.items.pop(id)).collect();
        info!("Cleared {} short-term memories", removed.len());
        removed
    }

    /// Switch strategy; stored items are untouched
    pub fn set_strategy(&mut self, strategy: EvictionStrategy) {
        let old = self.strategy;
        self.strategy = strategy;
        info!("Eviction strategy switched: {} -> {}", old, strategy);

        for listener in &self.listeners {
            let outcome = catch_unwind(AssertUnwindSafe(|| listener(old, strategy)));
            if outcome.is_err() {
                warn!("Strategy change listener panicked; continuing");
            }
        }
    }

    pub fn on_strategy_change(&mut self, listener: StrategyListener) {
        self.listeners.push(listener);
    }

    pub fn stats(&self) -> EvictionReport {
        let mut priority_distribution = BTreeMap::new();
        for item in self.oldest_first() {
            *priority_distribution
                .entry(format!("{:.1}", item.importance))
                .or_insert(0) += 1;
        }

        EvictionReport {
            current_size: self.items.len(),
            max_size: self.config.max_size,
            physical_capacity: self.config.physical_capacity(),
            current_strategy: self.strategy,
            total_evictions: self.stats.total_evictions,
            eviction_reasons: self.stats.eviction_reasons.clone(),
            priority_distribution,
        }
    }

    pub fn snapshot(&self) -> EvictionSnapshot {
        EvictionSnapshot {
            config: EvictionConfig {
                strategy: self.strategy,
                ..self.config
            },
            items: self.get_all(),
            stats: self.stats.clone(),
        }
    }

    /// Rebuild from a snapshot, trimming to the physical ceiling
    pub fn restore(snapshot: EvictionSnapshot) -> Self {
        let mut manager = Self::new(snapshot.config);
        manager.stats = snapshot.stats;
        for item in snapshot.items {
            manager.items.push(item.id.clone(), item);
        }
        while manager.items.len() > manager.config.physical_capacity() {
            if !manager.evict_by_strategy() {
                break;
            }
        }
        manager
    }

    fn oldest_first(&self) -> impl Iterator<Item = &MemoryItem> {
        self.items.iter().rev().map(|(_, v)| v)
    }

    fn evict_low_importance(&mut self) -> bool {
        let victim = self
            .oldest_first()
            .filter(|i| i.importance < self.config.min_importance)
            .min_by(|a, b| {
                a.importance
                    .total_cmp(&b.importance)
                    .then(a.created_at.cmp(&b.created_at))
            })
            .map(|i| i.id.clone());

        match victim {
            Some(id) => {
                self.remove_victim(&id, REASON_LOW_IMPORTANCE);
                true
            }
            None => false,
        }
    }

    fn evict_by_strategy(&mut self) -> bool {
        let now = Utc::now();
        let strategy = self.effective_strategy(now);
        let victim = self
            .oldest_first()
            .min_by(|a, b| self.compare_for_eviction(strategy, now, a, b))
            .map(|i| i.id.clone());

        match victim {
            Some(id) => {
                self.remove_victim(&id, REASON_STRATEGY);
                true
            }
            None => false,
        }
    }

    fn remove_victim(&mut self, id: &str, reason: &str) {
        if let Some(item) = self.items.pop(id) {
            self.stats.record(reason);
            debug!(
                "Evicted memory {} (importance={:.2}, reason={}, strategy={})",
                item.id, item.importance, reason, self.strategy
            );
        }
    }

    /// Resolve adaptive into a concrete strategy
    fn effective_strategy(&self, now: DateTime<Utc>) -> EvictionStrategy {
        if self.strategy != EvictionStrategy::Adaptive {
            return self.strategy;
        }
        let hour_ago = now - Duration::hours(1);
        let (recent, total) = self.oldest_first().fold((0u64, 0u64), |(recent, total), item| {
            let count = item.access_count as u64;
            let recent = if item.last_accessed > hour_ago { recent + count } else { recent };
            (recent, total + count)
        });
        let ratio = recent as f64 / (total + 1) as f64;
        if ratio > 0.5 {
            EvictionStrategy::Lru
        } else {
            EvictionStrategy::Lfu
        }
    }

    /// `Less` means `a` is evicted before `b`
    fn compare_for_eviction(
        &self,
        strategy: EvictionStrategy,
        now: DateTime<Utc>,
        a: &MemoryItem,
        b: &MemoryItem,
    ) -> Ordering {
        match strategy {
            EvictionStrategy::Fifo => a.created_at.cmp(&b.created_at),
            EvictionStrategy::Lfu => a.access_count.cmp(&b.access_count),
            EvictionStrategy::Lru => a.last_accessed.cmp(&b.last_accessed),
            EvictionStrategy::Priority => a.importance.total_cmp(&b.importance),
            EvictionStrategy::Hybrid | EvictionStrategy::Adaptive => {
                hybrid_score(a, now).total_cmp(&hybrid_score(b, now))
            }
        }
    }
}

/// Retention score for the hybrid strategy; lower is evicted first
pub fn hybrid_score(item: &MemoryItem, now: DateTime<Utc>) -> f64 {
    let recency = 1.0 / (item.age_hours(now) + 1.0);
    let frequency = ((item.access_count as f64 + 1.0) / 100.0).min(1.0);
    item.importance as f64 * 0.4 + recency * 0.3 + frequency * 0.3
}

/// Time-decayed priority for ranking items outside a live store
///
/// Age decays by `decay_factor` per day. Under [`EvictionStrategy::Hybrid`]
/// the priority is `importance·(1−time_weight) + (1−decay)·time_weight`,
/// which stays in [0, 1]. FIFO ranks by negated age in hours and LFU by
/// `access_count·(1+importance)`; every other strategy ranks by importance.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriorityCalculator {
    pub decay_factor: f64,
    pub time_weight: f64,
}

impl Default for PriorityCalculator {
    fn default() -> Self {
        Self {
            decay_factor: 0.95,
            time_weight: 0.3,
        }
    }
}

impl PriorityCalculator {
    pub fn new(decay_factor: f64, time_weight: f64) -> Self {
        Self {
            decay_factor: decay_factor.clamp(0.0, 1.0),
            time_weight: time_weight.clamp(0.0, 1.0),
        }
    }

    pub fn priority(
        &self,
        importance: f32,
        created_at: DateTime<Utc>,
        access_count: u32,
        strategy: EvictionStrategy,
    ) -> f64 {
        self.priority_at(importance, created_at, access_count, strategy, Utc::now())
    }

    /// [`priority`](Self::priority) with an explicit clock
    pub fn priority_at(
        &self,
        importance: f32,
        created_at: DateTime<Utc>,
        access_count: u32,
        strategy: EvictionStrategy,
        now: DateTime<Utc>,
    ) -> f64 {
        let importance = importance.clamp(0.0, 1.0) as f64;
        let age_hours = ((now - created_at).num_seconds().max(0) as f64) / 3600.0;

        match strategy {
            EvictionStrategy::Fifo => -age_hours,
            EvictionStrategy::Lfu => access_count as f64 * (1.0 + importance),
            EvictionStrategy::Hybrid => {
                let time_factor = self.decay_factor.powf(age_hours / 24.0);
                importance * (1.0 - self.time_weight) + (1.0 - time_factor) * self.time_weight
            }
            _ => importance,
        }
    }

    /// Up to `count` items, lowest priority first
    pub fn select_eviction_candidates(
        &self,
        items: &[MemoryItem],
        count: usize,
        strategy: EvictionStrategy,
    ) -> Vec<MemoryItem> {
        let now = Utc::now();
        let mut ranked: Vec<(f64, &MemoryItem)> = items
            .iter()
            .map(|i| {
                (
                    self.priority_at(i.importance, i.created_at, i.access_count, strategy, now),
                    i,
                )
            })
            .collect();
        ranked.sort_by(|a, b| a.0.total_cmp(&b.0));
        ranked.into_iter().take(count).map(|(_, i)| i.clone()).collect()
    }
}

impl Default for EvictionManager {
    fn default() -> Self {
        Self::new(EvictionConfig::default())
    }
}
