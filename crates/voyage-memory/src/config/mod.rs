use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::error::{Result, VoyageError};
use crate::memory::consolidation::ConsolidationConfig;
use crate::memory::eviction::EvictionConfig;
use crate::memory::hierarchy::ArchiveConfig;
use crate::memory::importance::ScorerConfig;
use crate::memory::summarizer::SummarizerConfig;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// Snapshot storage location
    #[serde(default)]
    pub storage: StorageConfig,
    /// Importance scoring thresholds
    #[serde(default)]
    pub scorer: ScorerConfig,
    /// Short-term store capacity and strategy
    #[serde(default)]
    pub eviction: EvictionConfig,
    /// Summarization defaults
    #[serde(default)]
    pub summarizer: SummarizerConfig,
    /// Hot/warm/cold session archive
    #[serde(default)]
    pub archive: ArchiveConfig,
    /// Long-term consolidation
    #[serde(default)]
    pub consolidation: ConsolidationConfig,
    /// Optional language model collaborator
    #[serde(default)]
    pub llm: LlmConfig,
    /// Optional embedding collaborator
    #[serde(default)]
    pub embedding: EmbeddingConfig,
}

impl Config {
    /// Parse a TOML file and validate the result
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            VoyageError::Config(format!("Failed to read {}: {e}", path.display()))
        })?;
        Self::from_toml(&content)
    }

    /// Parse TOML text and validate the result
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)
            .map_err(|e| VoyageError::Config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would break store invariants
    pub fn validate(&self) -> Result<()> {
        let eviction = &self.eviction;
        if eviction.max_size == 0 {
            return Err(VoyageError::Config(
                "eviction.max_size must be at least 1".to_string(),
            ));
        }
        if eviction.buffer_ratio < 0.0 {
            return Err(VoyageError::Config(
                "eviction.buffer_ratio must not be negative".to_string(),
            ));
        }
        check_unit("eviction.min_importance", eviction.min_importance)?;
        check_unit(
            "scorer.high_importance_threshold",
            self.scorer.high_importance_threshold,
        )?;
        check_unit(
            "scorer.llm_activation_threshold",
            self.scorer.llm_activation_threshold,
        )?;
        check_unit("scorer.llm_weight", self.scorer.llm_weight)?;
        check_unit(
            "consolidation.similarity_threshold",
            self.consolidation.similarity_threshold,
        )?;
        if self.archive.hot_cache_size == 0 {
            return Err(VoyageError::Config(
                "archive.hot_cache_size must be at least 1".to_string(),
            ));
        }
        if self.summarizer.context_max_messages == 0 {
            return Err(VoyageError::Config(
                "summarizer.context_max_messages must be at least 1".to_string(),
            ));
        }
        if self.llm.enabled {
            url::Url::parse(&self.llm.api_url).map_err(|e| {
                VoyageError::Config(format!("llm.api_url '{}' is invalid: {e}", self.llm.api_url))
            })?;
        }
        Ok(())
    }
}

fn check_unit(name: &str, value: f32) -> Result<()> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(VoyageError::Config(format!(
            "{name} must be within [0, 1], got {value}"
        )))
    }
}

/// Snapshot storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Base directory for all snapshot files
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Write snapshots after mutations
    #[serde(default = "default_persist")]
    pub persist: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            persist: default_persist(),
        }
    }
}

impl StorageConfig {
    pub fn profiles_path(&self) -> Option<PathBuf> {
        self.snapshot_path("profiles.json")
    }

    pub fn archive_path(&self) -> Option<PathBuf> {
        self.snapshot_path("archive.json")
    }

    pub fn consolidation_path(&self) -> Option<PathBuf> {
        self.snapshot_path("consolidation.json")
    }

    fn snapshot_path(&self, file: &str) -> Option<PathBuf> {
        self.persist.then(|| self.data_dir.join(file))
    }
}

fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".voyage"))
        .unwrap_or_else(|| PathBuf::from(".voyage"))
}

fn default_persist() -> bool {
    true
}

/// Remote language model configuration (OpenAI-compatible)
#[derive(Debug, Clone, Deserialize)]
pub struct LlmConfig {
    /// Use the language model for scoring refinement and summaries
    #[serde(default)]
    pub enabled: bool,
    /// API endpoint URL
    #[serde(default)]
    pub api_url: String,
    /// Environment variable name for API key
    #[serde(default = "default_llm_api_key_env")]
    pub api_key_env: String,
    /// Model identifier
    #[serde(default = "default_llm_model")]
    pub model: String,
    /// Request timeout in seconds
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
    /// Sampling temperature
    #[serde(default = "default_llm_temperature")]
    pub temperature: f32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_url: String::new(),
            api_key_env: default_llm_api_key_env(),
            model: default_llm_model(),
            timeout_secs: default_llm_timeout_secs(),
            temperature: default_llm_temperature(),
        }
    }
}

fn default_llm_api_key_env() -> String {
    "VOYAGE_LLM_API_KEY".to_string()
}

fn default_llm_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_llm_timeout_secs() -> u64 {
    30
}

fn default_llm_temperature() -> f32 {
    0.3
}

/// Embedding configuration
#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingConfig {
    /// Dimension of vectors produced by the embedding provider
    #[serde(default = "default_dimension")]
    pub dimension: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            dimension: default_dimension(),
        }
    }
}

fn default_dimension() -> usize {
    384
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::eviction::EvictionStrategy;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.eviction.max_size, 20);
        assert_eq!(config.eviction.min_importance, 0.3);
        assert_eq!(config.eviction.buffer_ratio, 0.2);
        assert_eq!(config.eviction.strategy, EvictionStrategy::Hybrid);
        assert_eq!(config.scorer.high_importance_threshold, 0.5);
        assert_eq!(config.archive.hot_cache_size, 100);
        assert!(!config.archive.enable_vector_search);
        assert_eq!(config.consolidation.similarity_threshold, 0.7);
        assert_eq!(config.consolidation.min_cluster_size, 2);
        assert_eq!(config.consolidation.max_clusters, 100);
        assert_eq!(config.consolidation.consolidation_interval_hours, 24);
        assert!(!config.llm.enabled);
        assert_eq!(config.llm.timeout_secs, 30);
        assert_eq!(config.embedding.dimension, 384);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_toml_deserialization() {
        let toml_str = r#"
[storage]
data_dir = "/tmp/voyage"
persist = false

[eviction]
max_size = 50
strategy = "lru"

[archive]
hot_cache_size = 10
enable_vector_search = true

[consolidation]
similarity_threshold = 0.5

[llm]
enabled = true
api_url = "https://api.example.com/v1"
model = "qwen-plus"
"#;
        let config = Config::from_toml(toml_str).unwrap();
        assert_eq!(config.storage.data_dir, PathBuf::from("/tmp/voyage"));
        assert!(config.storage.profiles_path().is_none());
        assert_eq!(config.eviction.max_size, 50);
        assert_eq!(config.eviction.strategy, EvictionStrategy::Lru);
        // unspecified fields keep defaults
        assert_eq!(config.eviction.min_importance, 0.3);
        assert_eq!(config.archive.hot_cache_size, 10);
        assert!(config.archive.enable_vector_search);
        assert_eq!(config.consolidation.similarity_threshold, 0.5);
        assert_eq!(config.consolidation.max_clusters, 100);
        assert!(config.llm.enabled);
        assert_eq!(config.llm.model, "qwen-plus");
        assert_eq!(config.llm.api_key_env, "VOYAGE_LLM_API_KEY");
    }

    #[test]
    fn test_snapshot_paths_follow_data_dir() {
        let config = Config::from_toml("[storage]\ndata_dir = \"/var/lib/voyage\"\n").unwrap();
        assert_eq!(
            config.storage.archive_path(),
            Some(PathBuf::from("/var/lib/voyage/archive.json"))
        );
        assert_eq!(
            config.storage.consolidation_path(),
            Some(PathBuf::from("/var/lib/voyage/consolidation.json"))
        );
    }

    #[test]
    fn test_unknown_strategy_rejected() {
        let result = Config::from_toml("[eviction]\nstrategy = \"random\"\n");
        assert!(matches!(result, Err(VoyageError::Config(_))));
    }

    #[test]
    fn test_out_of_range_values_rejected() {
        assert!(Config::from_toml("[eviction]\nmax_size = 0\n").is_err());
        assert!(Config::from_toml("[eviction]\nbuffer_ratio = -0.5\n").is_err());
        assert!(Config::from_toml("[scorer]\nhigh_importance_threshold = 1.5\n").is_err());
        assert!(Config::from_toml("[archive]\nhot_cache_size = 0\n").is_err());
    }

    #[test]
    fn test_enabled_llm_requires_valid_url() {
        let result = Config::from_toml("[llm]\nenabled = true\napi_url = \"not a url\"\n");
        assert!(matches!(result, Err(VoyageError::Config(_))));
    }

    #[test]
    fn test_empty_config_is_default() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.eviction.max_size, 20);
        assert!(config.storage.persist);
    }
}
