//! Long-term memory consolidation
//!
//! Archived memories are bucketed by a fixed topic lexicon, then grouped
//! inside each bucket by word overlap and shared session. Each group becomes
//! a cluster with a merged summary and an importance score. Clusters that go
//! untouched for a full interval are pooled and re-consolidated by the
//! scheduled run; low-importance clusters can be pruned or explicitly
//! forgotten.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::llm::{self, LlmClient, prompts};
use crate::memory::types::{MemoryItem, truncate_chars};
use crate::storage::{load_snapshot, save_snapshot};

/// Topic lexicon; the first topic with a keyword hit wins
const TOPIC_KEYWORDS: &[(&str, &[&str])] = &[
    ("旅行规划", &["计划", "行程", "路线", "安排", "攻略"]),
    ("预算", &["预算", "花费", "费用", "钱", "价格"]),
    ("目的地", &["城市", "景点", "地方", "去", "玩"]),
    ("交通", &["交通", "飞机", "火车", "高铁", "自驾"]),
    ("住宿", &["住宿", "酒店", "民宿", "宾馆"]),
    ("美食", &["美食", "好吃", "餐厅", "小吃", "食物"]),
    ("天气", &["天气", "季节", "温度", "气候"]),
    ("同伴", &["同伴", "家人", "朋友", "情侣", "孩子"]),
];
const DEFAULT_TOPIC: &str = "其他";

/// Clusters at or above this importance are never pruned
const PRUNE_IMPORTANCE_FLOOR: f32 = 0.3;
const MEMBER_TEXT_CHARS: usize = 500;
const FALLBACK_SUMMARY_CHARS: usize = 200;
const FALLBACK_SUMMARY_ITEMS: usize = 3;

fn default_similarity_threshold() -> f32 {
    0.7
}

fn default_min_cluster_size() -> usize {
    2
}

fn default_max_clusters() -> usize {
    100
}

fn default_interval_hours() -> u32 {
    24
}

fn default_forget_max_age_days() -> u32 {
    30
}

fn default_forget_min_importance() -> f32 {
    0.2
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsolidationConfig {
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f32,
    #[serde(default = "default_min_cluster_size")]
    pub min_cluster_size: usize,
    #[serde(default = "default_max_clusters")]
    pub max_clusters: usize,
    #[serde(default = "default_interval_hours")]
    pub consolidation_interval_hours: u32,
    /// Defaults for [`MemoryConsolidator::get_forgotten_memories`]
    #[serde(default = "default_forget_max_age_days")]
    pub forget_max_age_days: u32,
    #[serde(default = "default_forget_min_importance")]
    pub forget_min_importance: f32,
}

impl Default for ConsolidationConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: default_similarity_threshold(),
            min_cluster_size: default_min_cluster_size(),
            max_clusters: default_max_clusters(),
            consolidation_interval_hours: default_interval_hours(),
            forget_max_age_days: default_forget_max_age_days(),
            forget_min_importance: default_forget_min_importance(),
        }
    }
}

impl ConsolidationConfig {
    fn interval(&self) -> Duration {
        Duration::hours(i64::from(self.consolidation_interval_hours))
    }
}

fn default_importance() -> f32 {
    0.5
}

/// A unit of long-term memory fed to the consolidator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchivedMemory {
    pub id: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default = "default_importance")]
    pub importance: f32,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl ArchivedMemory {
    pub fn new(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            session_id: None,
            content: content.into(),
            summary: String::new(),
            importance: default_importance(),
            created_at: Utc::now(),
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_importance(mut self, importance: f32) -> Self {
        self.importance = importance.clamp(0.0, 1.0);
        self
    }

    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = summary.into();
        self
    }

    /// Archive a short-term item under its session
    pub fn from_item(item: &MemoryItem, session_id: &str) -> Self {
        Self {
            id: item.id.clone(),
            session_id: Some(session_id.to_string()),
            content: item.content.clone(),
            summary: String::new(),
            importance: item.importance,
            created_at: item.created_at,
        }
    }

    /// Content, or the summary when content is empty
    pub fn text(&self) -> &str {
        if self.content.is_empty() {
            &self.summary
        } else {
            &self.content
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryCluster {
    pub cluster_id: String,
    pub memories: Vec<ArchivedMemory>,
    pub topic: String,
    pub merged_summary: String,
    pub importance_score: f32,
    pub created_at: DateTime<Utc>,
    pub last_consolidated: DateTime<Utc>,
    pub consolidation_count: u32,
    pub source_sessions: BTreeSet<String>,
}

impl MemoryCluster {
    fn new(topic: &str, memories: Vec<ArchivedMemory>, now: DateTime<Utc>) -> Self {
        let mut cluster = Self {
            cluster_id: format!("cluster_{}", &Uuid::new_v4().simple().to_string()[..12]),
            memories,
            topic: topic.to_string(),
            merged_summary: String::new(),
            importance_score: 0.0,
            created_at: now,
            last_consolidated: now,
            consolidation_count: 0,
            source_sessions: BTreeSet::new(),
        };
        cluster.refresh_sources();
        cluster
    }

    fn refresh_sources(&mut self) {
        self.source_sessions = self
            .memories
            .iter()
            .filter_map(|m| m.session_id.clone())
            .filter(|s| !s.is_empty())
            .collect();
    }

    /// `0.6 * mean importance + 0.4 * min(size / 10, 1)`, at most 1
    pub fn compute_importance(&self) -> f32 {
        if self.memories.is_empty() {
            return 0.0;
        }
        let n = self.memories.len() as f32;
        let mean = self.memories.iter().map(|m| m.importance).sum::<f32>() / n;
        let size_factor = (n / 10.0).min(1.0);
        (mean * 0.6 + size_factor * 0.4).min(1.0)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ConsolidationResult {
    pub clusters_created: usize,
    pub memories_consolidated: usize,
    pub memories_forgotten: usize,
    pub details: Vec<String>,
}

impl ConsolidationResult {
    pub fn is_empty(&self) -> bool {
        self.clusters_created == 0 && self.memories_consolidated == 0 && self.memories_forgotten == 0
    }
}

/// A memory eligible for forgetting
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForgetCandidate {
    pub memory: ArchivedMemory,
    pub cluster_id: String,
    pub reason: &'static str,
    pub tagged_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConsolidationCounters {
    pub total_consolidations: u64,
    pub total_memories_consolidated: u64,
    pub total_clusters_pruned: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConsolidationStats {
    pub total_clusters: usize,
    pub total_memories_in_clusters: usize,
    pub topic_distribution: BTreeMap<String, usize>,
    pub avg_cluster_size: f64,
    pub counters: ConsolidationCounters,
    pub last_consolidation: DateTime<Utc>,
}

/// Persistent consolidator state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsolidatorSnapshot {
    pub clusters: Vec<MemoryCluster>,
    pub last_consolidation: DateTime<Utc>,
    #[serde(default)]
    pub counters: ConsolidationCounters,
}

/// Topic of a text per the lexicon
pub fn detect_topic(text: &str) -> &'static str {
    let text = text.to_lowercase();
    TOPIC_KEYWORDS
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|k| text.contains(k)))
        .map(|(topic, _)| *topic)
        .unwrap_or(DEFAULT_TOPIC)
}

/// `0.7 * word Jaccard + 0.3 * same session`; zero when either text has no words
pub fn memory_similarity(a: &ArchivedMemory, b: &ArchivedMemory) -> f32 {
    let text_a = a.text().to_lowercase();
    let text_b = b.text().to_lowercase();
    let words_a: HashSet<&str> = text_a.split_whitespace().collect();
    let words_b: HashSet<&str> = text_b.split_whitespace().collect();
    if words_a.is_empty() || words_b.is_empty() {
        return 0.0;
    }

    let intersection = words_a.intersection(&words_b).count() as f32;
    let union = words_a.union(&words_b).count() as f32;
    let jaccard = intersection / union;

    let same_session = match (&a.session_id, &b.session_id) {
        (Some(x), Some(y)) if x == y => 1.0,
        _ => 0.0,
    };

    jaccard * 0.7 + same_session * 0.3
}

/// Rule-based merged summary: first three distinct texts joined, bounded
fn fallback_summary(contents: &[String]) -> String {
    let mut distinct: Vec<&str> = Vec::new();
    for content in contents {
        if !distinct.contains(&content.as_str()) {
            distinct.push(content);
        }
    }
    let combined = distinct
        .into_iter()
        .take(FALLBACK_SUMMARY_ITEMS)
        .collect::<Vec<_>>()
        .join(" | ");

    if combined.chars().count() > FALLBACK_SUMMARY_CHARS {
        format!("{}...", truncate_chars(&combined, FALLBACK_SUMMARY_CHARS))
    } else {
        combined
    }
}

/// Clusters archived memories and manages their lifecycle
pub struct MemoryConsolidator {
    config: ConsolidationConfig,
    llm: Option<Arc<dyn LlmClient>>,
    clusters: BTreeMap<String, MemoryCluster>,
    last_consolidation: DateTime<Utc>,
    counters: ConsolidationCounters,
    storage_path: Option<PathBuf>,
}

impl fmt::Debug for MemoryConsolidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryConsolidator")
            .field("config", &self.config)
            .field("clusters", &self.clusters.len())
            .field("last_consolidation", &self.last_consolidation)
            .finish()
    }
}

impl MemoryConsolidator {
    pub fn new(config: ConsolidationConfig) -> Self {
        Self {
            config,
            llm: None,
            clusters: BTreeMap::new(),
            last_consolidation: Utc::now(),
            counters: ConsolidationCounters::default(),
            storage_path: None,
        }
    }

    /// Consolidator persisted at `path`, loading any existing snapshot best-effort
    pub fn open(config: ConsolidationConfig, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut consolidator = Self::new(config);

        match load_snapshot::<ConsolidatorSnapshot>(&path) {
            Ok(Some(snapshot)) => consolidator.apply_snapshot(snapshot),
            Ok(None) => info!("No consolidation snapshot at {}, starting empty", path.display()),
            Err(e) => error!("Failed to load consolidation snapshot: {}", e),
        }

        consolidator.storage_path = Some(path);
        consolidator
    }

    /// Rebuild a consolidator from a snapshot
    pub fn restore(config: ConsolidationConfig, snapshot: ConsolidatorSnapshot) -> Self {
        let mut consolidator = Self::new(config);
        consolidator.apply_snapshot(snapshot);
        consolidator
    }

    fn apply_snapshot(&mut self, snapshot: ConsolidatorSnapshot) {
        self.clusters = snapshot
            .clusters
            .into_iter()
            .filter(|c| !c.memories.is_empty())
            .map(|c| (c.cluster_id.clone(), c))
            .collect();
        self.last_consolidation = snapshot.last_consolidation;
        self.counters = snapshot.counters;
        info!("Loaded {} memory clusters", self.clusters.len());
    }

    pub fn with_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    pub fn config(&self) -> &ConsolidationConfig {
        &self.config
    }

    pub fn snapshot(&self) -> ConsolidatorSnapshot {
        ConsolidatorSnapshot {
            clusters: self.clusters.values().cloned().collect(),
            last_consolidation: self.last_consolidation,
            counters: self.counters.clone(),
        }
    }

    pub fn last_consolidation(&self) -> DateTime<Utc> {
        self.last_consolidation
    }

    /// Cluster `memories` and store the resulting clusters
    pub async fn consolidate(&mut self, memories: Vec<ArchivedMemory>) -> ConsolidationResult {
        let result = self.consolidate_at(memories, Utc::now()).await;
        self.save();
        result
    }

    async fn consolidate_at(
        &mut self,
        memories: Vec<ArchivedMemory>,
        now: DateTime<Utc>,
    ) -> ConsolidationResult {
        let mut result = ConsolidationResult::default();
        if memories.is_empty() {
            return result;
        }

        for (topic, bucket) in bucket_by_topic(memories) {
            for group in self.group_by_similarity(bucket) {
                let mut cluster = MemoryCluster::new(topic, group, now);
                self.summarize_cluster(&mut cluster).await;
                cluster.importance_score = cluster.compute_importance();

                result.clusters_created += 1;
                result.memories_consolidated += cluster.memories.len();
                result.details.push(format!(
                    "{}: {} 条记忆 -> {}",
                    topic,
                    cluster.memories.len(),
                    cluster.cluster_id
                ));
                debug!(
                    "Created cluster {} (topic {}, {} memories, importance {:.2})",
                    cluster.cluster_id,
                    topic,
                    cluster.memories.len(),
                    cluster.importance_score
                );
                self.clusters.insert(cluster.cluster_id.clone(), cluster);
            }
        }

        if self.clusters.len() > self.config.max_clusters {
            let excess = self.clusters.len() - self.config.max_clusters;
            result.memories_forgotten = self.prune(excess, &mut result.details);
        }

        self.counters.total_consolidations += 1;
        self.counters.total_memories_consolidated += result.memories_consolidated as u64;

        info!(
            "Consolidated {} memories into {} clusters",
            result.memories_consolidated, result.clusters_created
        );
        result
    }

    /// Greedy single pass: the first unclaimed memory seeds a group that
    /// absorbs every remaining unclaimed memory similar enough to the seed
    fn group_by_similarity(&self, bucket: Vec<ArchivedMemory>) -> Vec<Vec<ArchivedMemory>> {
        if bucket.len() < self.config.min_cluster_size {
            return bucket.into_iter().map(|m| vec![m]).collect();
        }

        let mut claimed = vec![false; bucket.len()];
        let mut groups: Vec<Vec<usize>> = Vec::new();
        for seed in 0..bucket.len() {
            if claimed[seed] {
                continue;
            }
            claimed[seed] = true;
            let mut group = vec![seed];
            for other in (seed + 1)..bucket.len() {
                if !claimed[other]
                    && memory_similarity(&bucket[seed], &bucket[other])
                        >= self.config.similarity_threshold
                {
                    claimed[other] = true;
                    group.push(other);
                }
            }
            groups.push(group);
        }

        let mut slots: Vec<Option<ArchivedMemory>> = bucket.into_iter().map(Some).collect();
        groups
            .into_iter()
            .map(|group| group.into_iter().filter_map(|i| slots[i].take()).collect())
            .collect()
    }

    async fn summarize_cluster(&self, cluster: &mut MemoryCluster) {
        if let [only] = cluster.memories.as_slice() {
            cluster.merged_summary = only.text().to_string();
            return;
        }

        let contents: Vec<String> = cluster
            .memories
            .iter()
            .map(|m| m.text())
            .filter(|t| !t.is_empty())
            .map(|t| truncate_chars(t, MEMBER_TEXT_CHARS))
            .collect();
        if contents.is_empty() {
            cluster.merged_summary = String::new();
            return;
        }

        let llm_summary = match &self.llm {
            Some(client) => {
                let prompt = prompts::CONSOLIDATION_PROMPT
                    .replace("{topic}", &cluster.topic)
                    .replace("{memories}", &contents.join("\n"));
                llm::complete(client.as_ref(), prompts::CONSOLIDATION_SYSTEM, &prompt).await
            }
            None => None,
        };

        cluster.merged_summary = llm_summary.unwrap_or_else(|| fallback_summary(&contents));
        cluster.consolidation_count += 1;
    }

    /// Drop up to `count` of the least important clusters below the floor;
    /// returns the number of memories dropped
    fn prune(&mut self, count: usize, details: &mut Vec<String>) -> usize {
        let mut candidates: Vec<(String, f32)> = self
            .clusters
            .values()
            .filter(|c| c.importance_score < PRUNE_IMPORTANCE_FLOOR)
            .map(|c| (c.cluster_id.clone(), c.importance_score))
            .collect();
        candidates.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)));

        let mut forgotten = 0;
        for (cluster_id, _) in candidates.into_iter().take(count) {
            if let Some(cluster) = self.clusters.remove(&cluster_id) {
                forgotten += cluster.memories.len();
                details.push(format!("pruned {}", cluster_id));
                self.counters.total_clusters_pruned += 1;
            }
        }
        if forgotten > 0 {
            info!("Pruned clusters holding {} memories", forgotten);
        }
        forgotten
    }

    /// Re-consolidate stale clusters once per interval
    pub async fn run_scheduled_consolidation(&mut self) -> ConsolidationResult {
        self.run_scheduled_consolidation_at(Utc::now()).await
    }

    /// [`run_scheduled_consolidation`](Self::run_scheduled_consolidation) with an explicit clock
    pub async fn run_scheduled_consolidation_at(&mut self, now: DateTime<Utc>) -> ConsolidationResult {
        let interval = self.config.interval();
        if now - self.last_consolidation < interval {
            debug!("Scheduled consolidation skipped, interval not elapsed");
            return ConsolidationResult::default();
        }

        let stale: Vec<String> = self
            .clusters
            .values()
            .filter(|c| now - c.last_consolidated > interval)
            .map(|c| c.cluster_id.clone())
            .collect();

        let pooled: Vec<ArchivedMemory> = stale
            .iter()
            .filter_map(|id| self.clusters.remove(id))
            .flat_map(|c| c.memories)
            .collect();

        let result = if pooled.is_empty() {
            ConsolidationResult::default()
        } else {
            info!(
                "Re-consolidating {} stale clusters ({} memories)",
                stale.len(),
                pooled.len()
            );
            self.consolidate_at(pooled, now).await
        };

        self.last_consolidation = now;
        self.save();
        result
    }

    pub fn get_cluster(&self, cluster_id: &str) -> Option<&MemoryCluster> {
        self.clusters.get(cluster_id)
    }

    pub fn get_all_clusters(&self) -> Vec<&MemoryCluster> {
        self.clusters.values().collect()
    }

    pub fn get_clusters_by_topic(&self, topic: &str) -> Vec<&MemoryCluster> {
        self.clusters.values().filter(|c| c.topic == topic).collect()
    }

    /// Memories of clusters untouched for `max_age_days` whose importance is
    /// below `min_importance`
    pub fn get_forgotten_memories(&self, max_age_days: u32, min_importance: f32) -> Vec<ForgetCandidate> {
        self.forgotten_memories_at(Utc::now(), max_age_days, min_importance)
    }

    pub fn forgotten_memories_at(
        &self,
        now: DateTime<Utc>,
        max_age_days: u32,
        min_importance: f32,
    ) -> Vec<ForgetCandidate> {
        let cutoff = now - Duration::days(i64::from(max_age_days));
        self.clusters
            .values()
            .filter(|c| c.last_consolidated <= cutoff && c.importance_score < min_importance)
            .flat_map(|c| {
                c.memories.iter().map(|m| ForgetCandidate {
                    memory: m.clone(),
                    cluster_id: c.cluster_id.clone(),
                    reason: "low_importance",
                    tagged_at: now,
                })
            })
            .collect()
    }

    /// Remove memories by id; emptied clusters are dropped
    pub fn forget_memories(&mut self, memory_ids: &[String]) -> usize {
        let ids: HashSet<&str> = memory_ids.iter().map(String::as_str).collect();
        let mut forgotten = 0;

        self.clusters.retain(|_, cluster| {
            let before = cluster.memories.len();
            cluster.memories.retain(|m| !ids.contains(m.id.as_str()));
            let removed = before - cluster.memories.len();
            if removed > 0 {
                forgotten += removed;
                cluster.refresh_sources();
            }
            !cluster.memories.is_empty()
        });

        if forgotten > 0 {
            info!("Forgot {} memories", forgotten);
            self.save();
        }
        forgotten
    }

    pub fn stats(&self) -> ConsolidationStats {
        let mut topic_distribution = BTreeMap::new();
        for cluster in self.clusters.values() {
            *topic_distribution.entry(cluster.topic.clone()).or_insert(0) += 1;
        }
        let total_memories: usize = self.clusters.values().map(|c| c.memories.len()).sum();

        ConsolidationStats {
            total_clusters: self.clusters.len(),
            total_memories_in_clusters: total_memories,
            topic_distribution,
            avg_cluster_size: total_memories as f64 / self.clusters.len().max(1) as f64,
            counters: self.counters.clone(),
            last_consolidation: self.last_consolidation,
        }
    }

    fn save(&self) {
        let Some(path) = &self.storage_path else {
            return;
        };
        if let Err(e) = save_snapshot(path, &self.snapshot()) {
            error!("Failed to save consolidation snapshot: {}", e);
        }
    }
}

/// Group memories by topic, buckets in first-seen order
fn bucket_by_topic(memories: Vec<ArchivedMemory>) -> Vec<(&'static str, Vec<ArchivedMemory>)> {
    let mut buckets: Vec<(&'static str, Vec<ArchivedMemory>)> = Vec::new();
    for memory in memories {
        let topic = detect_topic(memory.text());
        match buckets.iter_mut().find(|(t, _)| *t == topic) {
            Some((_, bucket)) => bucket.push(memory),
            None => buckets.push((topic, vec![memory])),
        }
    }
    buckets
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ChatResponse;
    use crate::testing::MockLlmClient;
    use tempfile::TempDir;

    fn mem(id: &str, session: &str, content: &str) -> ArchivedMemory {
        ArchivedMemory::new(id, content).with_session(session)
    }

    #[test]
    fn test_detect_topic() {
        assert_eq!(detect_topic("这次行程怎么安排"), "旅行规划");
        assert_eq!(detect_topic("酒店太贵了"), "住宿");
        assert_eq!(detect_topic("预算有限，去哪个城市"), "预算");
        assert_eq!(detect_topic("随便聊聊"), "其他");
    }

    #[test]
    fn test_similarity() {
        let a = mem("1", "s1", "北京 旅游 预算 五千");
        let b = mem("2", "s1", "北京 旅游 预算 三天");
        let c = mem("3", "s2", "北京 旅游 预算 三天");
        // jaccard 3/5
        assert!((memory_similarity(&a, &b) - (0.6 * 0.7 + 0.3)).abs() < 1e-5);
        assert!((memory_similarity(&a, &c) - 0.42).abs() < 1e-5);
        assert_eq!(memory_similarity(&a, &mem("4", "s1", "")), 0.0);
    }

    #[test]
    fn test_fallback_summary() {
        let contents = vec!["a".to_string(), "b".to_string(), "a".to_string(), "c".to_string(), "d".to_string()];
        assert_eq!(fallback_summary(&contents), "a | b | c");

        let long = vec!["字".repeat(150), "词".repeat(150)];
        let summary = fallback_summary(&long);
        assert!(summary.ends_with("..."));
        assert_eq!(summary.chars().count(), 203);
    }

    #[test]
    fn test_cluster_importance() {
        let memories = vec![
            mem("1", "s", "x").with_importance(0.8),
            mem("2", "s", "y").with_importance(0.4),
        ];
        let cluster = MemoryCluster::new("其他", memories, Utc::now());
        assert!((cluster.compute_importance() - (0.6 * 0.6 + 0.4 * 0.2)).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_consolidate_empty() {
        let mut consolidator = MemoryConsolidator::new(ConsolidationConfig::default());
        let result = consolidator.consolidate(vec![]).await;
        assert!(result.is_empty());
        assert!(result.details.is_empty());
        assert_eq!(consolidator.stats().counters.total_consolidations, 0);
    }

    #[tokio::test]
    async fn test_near_identical_single_cluster() {
        let mut consolidator = MemoryConsolidator::new(ConsolidationConfig::default());
        let memories = vec![
            mem("1", "s1", "北京 酒店 推荐"),
            mem("2", "s2", "北京 酒店 推荐"),
            mem("3", "s3", "北京 酒店 推荐"),
        ];
        let result = consolidator.consolidate(memories).await;

        assert_eq!(result.clusters_created, 1);
        assert_eq!(result.memories_consolidated, 3);
        let cluster = consolidator.get_all_clusters()[0];
        assert_eq!(cluster.topic, "住宿");
        assert_eq!(cluster.merged_summary, "北京 酒店 推荐");
        assert_eq!(cluster.source_sessions.len(), 3);
        assert_eq!(cluster.consolidation_count, 1);
    }

    #[tokio::test]
    async fn test_dissimilar_singletons() {
        let mut consolidator = MemoryConsolidator::new(ConsolidationConfig::default());
        let memories = vec![
            mem("1", "s1", "高铁 还是 飞机"),
            mem("2", "s2", "想吃 当地 小吃"),
            mem("3", "s3", "天气 怎么样"),
        ];
        let result = consolidator.consolidate(memories).await;

        assert_eq!(result.clusters_created, 3);
        for cluster in consolidator.get_all_clusters() {
            assert_eq!(cluster.memories.len(), 1);
            assert_eq!(cluster.merged_summary, cluster.memories[0].content);
        }
        assert_eq!(consolidator.get_clusters_by_topic("美食").len(), 1);
    }

    #[tokio::test]
    async fn test_same_session_clusters_below_text_threshold() {
        let mut consolidator = MemoryConsolidator::new(ConsolidationConfig::default());
        let memories = vec![
            mem("1", "s1", "北京 旅游 预算 五千"),
            mem("2", "s1", "北京 旅游 预算 三天"),
        ];
        let result = consolidator.consolidate(memories).await;
        assert_eq!(result.clusters_created, 1);

        let mut other = MemoryConsolidator::new(ConsolidationConfig::default());
        let memories = vec![
            mem("1", "s1", "北京 旅游 预算 五千"),
            mem("2", "s2", "北京 旅游 预算 三天"),
        ];
        assert_eq!(other.consolidate(memories).await.clusters_created, 2);
    }

    #[tokio::test]
    async fn test_llm_summary_used() {
        let llm = Arc::new(MockLlmClient::always("用户关注北京住宿"));
        let mut consolidator =
            MemoryConsolidator::new(ConsolidationConfig::default()).with_llm(llm.clone());
        consolidator
            .consolidate(vec![mem("1", "s", "北京 酒店"), mem("2", "s", "北京 酒店 民宿")])
            .await;

        let cluster = consolidator.get_all_clusters()[0];
        assert_eq!(cluster.merged_summary, "用户关注北京住宿");
        assert_eq!(llm.call_count(), 1);
        let request = &llm.requests()[0];
        assert_eq!(request[0].content, "你是记忆整合专家");
        assert!(request[1].content.contains("北京 酒店 民宿"));
    }

    #[tokio::test]
    async fn test_llm_failure_falls_back() {
        let llm = Arc::new(MockLlmClient::with_replies(vec![ChatResponse::failed()]));
        let mut consolidator =
            MemoryConsolidator::new(ConsolidationConfig::default()).with_llm(llm);
        consolidator
            .consolidate(vec![mem("1", "s", "北京 酒店"), mem("2", "s", "北京 酒店 民宿")])
            .await;
        assert_eq!(
            consolidator.get_all_clusters()[0].merged_summary,
            "北京 酒店 | 北京 酒店 民宿"
        );
    }

    #[tokio::test]
    async fn test_prune_respects_floor() {
        let config = ConsolidationConfig {
            max_clusters: 2,
            ..ConsolidationConfig::default()
        };
        let mut consolidator = MemoryConsolidator::new(config);
        let memories = vec![
            mem("low", "s1", "高铁").with_importance(0.1),
            mem("mid", "s2", "酒店").with_importance(0.5),
            mem("high", "s3", "美食").with_importance(0.9),
            mem("high2", "s4", "天气").with_importance(0.9),
        ];
        let result = consolidator.consolidate(memories).await;

        // only the cluster under the floor goes, budget stays exceeded
        assert_eq!(result.clusters_created, 4);
        assert_eq!(result.memories_forgotten, 1);
        assert_eq!(consolidator.stats().total_clusters, 3);
        assert!(consolidator.get_clusters_by_topic("交通").is_empty());
    }

    #[tokio::test]
    async fn test_scheduled_noop_before_interval() {
        let mut consolidator = MemoryConsolidator::new(ConsolidationConfig::default());
        consolidator.consolidate(vec![mem("1", "s", "酒店")]).await;
        let start = consolidator.last_consolidation();

        let result = consolidator
            .run_scheduled_consolidation_at(start + Duration::hours(1))
            .await;
        assert!(result.is_empty());
        assert_eq!(consolidator.last_consolidation(), start);
    }

    #[tokio::test]
    async fn test_scheduled_reconsolidates_stale() {
        let mut consolidator = MemoryConsolidator::new(ConsolidationConfig::default());
        consolidator
            .consolidate(vec![mem("1", "s1", "北京 酒店"), mem("2", "s2", "北京 酒店")])
            .await;
        let old_id = consolidator.get_all_clusters()[0].cluster_id.clone();

        let later = Utc::now() + Duration::hours(25);
        let result = consolidator.run_scheduled_consolidation_at(later).await;

        assert_eq!(result.clusters_created, 1);
        assert_eq!(result.memories_consolidated, 2);
        assert!(consolidator.get_cluster(&old_id).is_none());
        let cluster = consolidator.get_all_clusters()[0];
        assert_eq!(cluster.last_consolidated, later);
        assert_eq!(consolidator.last_consolidation(), later);

        // same clock again: interval not elapsed
        assert!(consolidator.run_scheduled_consolidation_at(later).await.is_empty());
    }

    #[tokio::test]
    async fn test_forget_flow() {
        let mut consolidator = MemoryConsolidator::new(ConsolidationConfig::default());
        consolidator
            .consolidate(vec![
                mem("a", "s1", "高铁").with_importance(0.0),
                mem("b", "s2", "酒店").with_importance(0.9),
            ])
            .await;

        let now = Utc::now();
        assert!(consolidator.forgotten_memories_at(now, 30, 0.2).is_empty());

        let later = now + Duration::days(31);
        let candidates = consolidator.forgotten_memories_at(later, 30, 0.2);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].memory.id, "a");
        assert_eq!(candidates[0].reason, "low_importance");

        let ids: Vec<String> = candidates.iter().map(|c| c.memory.id.clone()).collect();
        assert_eq!(consolidator.forget_memories(&ids), 1);
        assert_eq!(consolidator.stats().total_clusters, 1);
        assert_eq!(consolidator.forget_memories(&ids), 0);
    }

    #[tokio::test]
    async fn test_forget_updates_sources() {
        let mut consolidator = MemoryConsolidator::new(ConsolidationConfig::default());
        consolidator
            .consolidate(vec![mem("a", "s1", "北京 酒店"), mem("b", "s2", "北京 酒店")])
            .await;
        consolidator.forget_memories(&["a".to_string()]);

        let cluster = consolidator.get_all_clusters()[0];
        assert_eq!(cluster.memories.len(), 1);
        assert_eq!(cluster.source_sessions.iter().collect::<Vec<_>>(), vec!["s2"]);
    }

    #[tokio::test]
    async fn test_persistence_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("consolidation.json");
        {
            let mut consolidator = MemoryConsolidator::open(ConsolidationConfig::default(), &path);
            consolidator
                .consolidate(vec![mem("a", "s1", "酒店"), mem("b", "s2", "高铁")])
                .await;
        }

        let consolidator = MemoryConsolidator::open(ConsolidationConfig::default(), &path);
        let stats = consolidator.stats();
        assert_eq!(stats.total_clusters, 2);
        assert_eq!(stats.counters.total_consolidations, 1);

        let restored =
            MemoryConsolidator::restore(ConsolidationConfig::default(), consolidator.snapshot());
        assert_eq!(restored.stats().total_memories_in_clusters, 2);
    }
}
