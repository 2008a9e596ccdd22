//! Dialogue compression
//!
//! Summaries are produced by the language model when one is configured and
//! the level calls for real compression; otherwise a rule-based digest of the
//! budget, trip length and destination mentioned by the user is used. Fact,
//! preference and topic extraction is always rule-based.

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, LazyLock};
use tracing::debug;

use crate::error::{Result, VoyageError};
use crate::llm::{self, LlmClient, prompts};
use crate::memory::hierarchy::SessionData;
use crate::memory::types::{Message, Role, SessionPreferences, push_unique, truncate_chars};

/// How hard to compress
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionLevel {
    Light,
    Moderate,
    Aggressive,
}

impl CompressionLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompressionLevel::Light => "light",
            CompressionLevel::Moderate => "moderate",
            CompressionLevel::Aggressive => "aggressive",
        }
    }

    /// Character limit of a rule-based summary before truncation
    fn max_chars(&self) -> usize {
        match self {
            CompressionLevel::Light => 300,
            CompressionLevel::Moderate => 150,
            CompressionLevel::Aggressive => 80,
        }
    }

    /// Instruction and target length for model summaries
    fn llm_target(&self) -> (&'static str, &'static str) {
        match self {
            CompressionLevel::Light => ("保留大部分细节，生成稍短的摘要", "200-300字"),
            CompressionLevel::Moderate => ("保留关键信息，去除冗余，生成简洁摘要", "100-150字"),
            CompressionLevel::Aggressive => ("只保留最核心的信息，非常简洁", "50-80字"),
        }
    }
}

impl fmt::Display for CompressionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CompressionLevel {
    type Err = VoyageError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "light" => Ok(CompressionLevel::Light),
            "moderate" => Ok(CompressionLevel::Moderate),
            "aggressive" => Ok(CompressionLevel::Aggressive),
            other => Err(VoyageError::Config(format!(
                "Unknown compression level: {other}"
            ))),
        }
    }
}

/// Kind of fact pulled from a user turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FactType {
    Budget,
    Days,
    Destination,
    Preference,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedFact {
    pub fact_type: FactType,
    pub value: String,
    pub confidence: f32,
    /// First 100 characters of the originating message
    pub source_message: String,
    pub timestamp: DateTime<Utc>,
}

impl ExtractedFact {
    fn new(fact_type: FactType, value: impl Into<String>, confidence: f32, source: &str) -> Self {
        Self {
            fact_type,
            value: value.into(),
            confidence,
            source_message: truncate_chars(source, 100),
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub summary: String,
    pub compression_level: CompressionLevel,
    pub key_facts: Vec<ExtractedFact>,
    pub user_preferences: SessionPreferences,
    pub topics: Vec<String>,
    pub message_count_before: usize,
    pub message_count_after: usize,
    /// May be negative when the summary is longer than the input
    pub tokens_saved: i64,
}

/// Digest of an archived session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionReport {
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub summary: String,
    pub compression_level: CompressionLevel,
    pub key_facts: Vec<ExtractedFact>,
    pub user_preferences: SessionPreferences,
    pub topics: Vec<String>,
    pub message_count: usize,
    pub tokens_saved: i64,
    /// Human-readable session length, when the session has ended
    pub duration: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummarizerConfig {
    /// Level used when archiving a session
    #[serde(default = "default_level")]
    pub default_level: CompressionLevel,
    /// Message budget for [`ConversationSummarizer::compress_for_context`]
    #[serde(default = "default_context_max_messages")]
    pub context_max_messages: usize,
    /// Per-message character limit when formatting a transcript for the model
    #[serde(default = "default_prompt_message_chars")]
    pub prompt_message_chars: usize,
}

impl Default for SummarizerConfig {
    fn default() -> Self {
        Self {
            default_level: default_level(),
            context_max_messages: default_context_max_messages(),
            prompt_message_chars: default_prompt_message_chars(),
        }
    }
}

fn default_level() -> CompressionLevel {
    CompressionLevel::Moderate
}

fn default_context_max_messages() -> usize {
    10
}

fn default_prompt_message_chars() -> usize {
    200
}

fn compile(patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .map(|p| Regex::new(p).expect("valid regex"))
        .collect()
}

static BUDGET_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        r"预算(\d+)",
        r"(\d+)元",
        r"(\d+)块",
        r"大概(.+)元左右",
        r"花费(.+)",
    ])
});

static DAYS_PATTERNS: LazyLock<Vec<Regex>> =
    LazyLock::new(|| compile(&[r"(\d+)\s*天", r"(\d+)日"]));

static CITY_PATTERNS: LazyLock<Vec<Regex>> =
    LazyLock::new(|| compile(&[r"去(.+)旅游", r"(.+)景点", r"在(.+)", r"(.+)城市"]));

/// Interest category and the words that signal it
const PREFERENCE_KEYWORDS: &[(&str, &[&str])] = &[
    ("美食", &["美食", "好吃", "餐厅", "小吃"]),
    ("自然", &["自然", "风景", "风光", "山水"]),
    ("历史", &["历史", "古迹", "文化", "博物馆"]),
    ("购物", &["购物", "商场", "免税"]),
    ("海滩", &["海滩", "海边", "海滨", "沙滩"]),
    ("休闲", &["休闲", "放松", "度假"]),
];

const TOPIC_KEYWORDS: &[(&str, &[&str])] = &[
    ("目的地推荐", &["推荐", "城市", "景点", "去"]),
    ("行程规划", &["行程", "路线", "安排", "计划", "天"]),
    ("预算咨询", &["预算", "花费", "费用", "钱"]),
    ("美食探索", &["美食", "好吃", "餐厅", "小吃"]),
    ("交通出行", &["交通", "怎么去", "飞机", "火车"]),
    ("住宿选择", &["住宿", "酒店", "宾馆", "民宿"]),
];

const DEFAULT_TOPIC: &str = "一般咨询";
const EMPTY_SUMMARY: &str = "空对话";
const NO_KEY_POINTS: &str = "一般对话";
const CONTEXT_SUMMARY_PREFIX: &str = "[历史对话摘要] ";

fn first_capture(patterns: &[Regex], text: &str) -> Option<String> {
    patterns.iter().find_map(|re| {
        re.captures(text)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string())
    })
}

pub fn extract_budget(text: &str) -> Option<String> {
    first_capture(&BUDGET_PATTERNS, text)
}

pub fn extract_days(text: &str) -> Option<String> {
    first_capture(&DAYS_PATTERNS, text)
}

pub fn extract_destination(text: &str) -> Option<String> {
    first_capture(&CITY_PATTERNS, text)
}

/// Interest categories mentioned in `text`, in lexicon order
fn interest_tags(text: &str) -> impl Iterator<Item = &'static str> + '_ {
    PREFERENCE_KEYWORDS
        .iter()
        .filter(move |(_, words)| words.iter().any(|w| text.contains(w)))
        .map(|(tag, _)| *tag)
}

fn parse_number(value: &str) -> Option<u32> {
    value.trim().parse().ok()
}

fn user_turns(messages: &[Message]) -> impl Iterator<Item = &str> {
    messages
        .iter()
        .filter(|m| m.role == Role::User)
        .map(|m| m.content.as_str())
}

fn estimate_tokens(messages: &[Message]) -> i64 {
    messages.iter().map(|m| m.estimate_tokens()).sum::<f64>() as i64
}

/// Compresses dialogue into summaries and extracts structured facts
pub struct ConversationSummarizer {
    config: SummarizerConfig,
    llm: Option<Arc<dyn LlmClient>>,
}

impl ConversationSummarizer {
    pub fn new(config: SummarizerConfig) -> Self {
        Self { config, llm: None }
    }

    pub fn with_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    pub fn config(&self) -> &SummarizerConfig {
        &self.config
    }

    /// Summarize a transcript at the given compression level
    pub async fn summarize(
        &self,
        messages: &[Message],
        level: CompressionLevel,
    ) -> ConversationSummary {
        if messages.is_empty() {
            return ConversationSummary {
                summary: EMPTY_SUMMARY.to_string(),
                compression_level: level,
                key_facts: Vec::new(),
                user_preferences: SessionPreferences::default(),
                topics: Vec::new(),
                message_count_before: 0,
                message_count_after: 0,
                tokens_saved: 0,
            };
        }

        let summary = match (&self.llm, level) {
            (Some(client), CompressionLevel::Moderate | CompressionLevel::Aggressive) => {
                match self.llm_summary(client.as_ref(), messages, level).await {
                    Some(text) => text,
                    None => self.rule_summary(messages, level),
                }
            }
            _ => self.rule_summary(messages, level),
        };

        let summary_turn = [Message::assistant(summary.clone())];
        let tokens_saved = estimate_tokens(messages) - estimate_tokens(&summary_turn);

        debug!(
            "Summarized {} messages at {} level, {} tokens saved",
            messages.len(),
            level,
            tokens_saved
        );

        ConversationSummary {
            summary,
            compression_level: level,
            key_facts: self.extract_key_facts(messages),
            user_preferences: self.extract_preferences(messages),
            topics: self.identify_topics(messages),
            message_count_before: messages.len(),
            message_count_after: 1,
            tokens_saved,
        }
    }

    /// Rule-based digest of budget, days and destination mentions
    pub fn rule_summary(&self, messages: &[Message], level: CompressionLevel) -> String {
        let mut key_points: Vec<String> = Vec::new();
        for content in user_turns(messages) {
            if let Some(budget) = extract_budget(content) {
                push_unique(&mut key_points, format!("预算: {budget}"));
            }
            if let Some(days) = extract_days(content) {
                push_unique(&mut key_points, format!("天数: {days}"));
            }
            if let Some(destination) = extract_destination(content) {
                push_unique(&mut key_points, format!("目的地: {destination}"));
            }
        }

        if key_points.is_empty() {
            return NO_KEY_POINTS.to_string();
        }

        let summary = match level {
            CompressionLevel::Light => format!("对话要点: {}", key_points.join(" | ")),
            CompressionLevel::Moderate => {
                key_points.truncate(5);
                format!("要点: {}", key_points.join(" | "))
            }
            CompressionLevel::Aggressive => {
                key_points.truncate(3);
                key_points.join(" | ")
            }
        };

        let max_chars = level.max_chars();
        if summary.chars().count() > max_chars {
            format!("{}...", truncate_chars(&summary, max_chars))
        } else {
            summary
        }
    }

    async fn llm_summary(
        &self,
        client: &dyn LlmClient,
        messages: &[Message],
        level: CompressionLevel,
    ) -> Option<String> {
        let (instruction, target_length) = level.llm_target();
        let prompt = prompts::SUMMARY_PROMPT
            .replace("{target_length}", target_length)
            .replace("{conversation}", &self.format_messages(messages))
            .replace("{instruction}", instruction);
        llm::complete(client, prompts::SUMMARY_SYSTEM, &prompt).await
    }

    fn format_messages(&self, messages: &[Message]) -> String {
        messages
            .iter()
            .map(|m| {
                format!(
                    "[{}]: {}",
                    m.role,
                    truncate_chars(&m.content, self.config.prompt_message_chars)
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Budget, days, destination and interest facts from user turns
    pub fn extract_key_facts(&self, messages: &[Message]) -> Vec<ExtractedFact> {
        let mut facts = Vec::new();
        for content in user_turns(messages) {
            if let Some(budget) = extract_budget(content) {
                facts.push(ExtractedFact::new(FactType::Budget, budget, 0.9, content));
            }
            if let Some(days) = extract_days(content) {
                facts.push(ExtractedFact::new(FactType::Days, days, 0.9, content));
            }
            if let Some(destination) = extract_destination(content) {
                facts.push(ExtractedFact::new(FactType::Destination, destination, 0.7, content));
            }
            for tag in interest_tags(content) {
                facts.push(ExtractedFact::new(FactType::Preference, tag, 0.8, content));
            }
        }
        facts
    }

    /// Session-level preferences; later mentions override earlier ones
    pub fn extract_preferences(&self, messages: &[Message]) -> SessionPreferences {
        let mut prefs = SessionPreferences::default();
        for content in user_turns(messages) {
            if let Some(budget) = extract_budget(content).as_deref().and_then(parse_number) {
                prefs.budget = Some(budget);
            }
            if let Some(days) = extract_days(content).as_deref().and_then(parse_number) {
                prefs.travel_days = Some(days);
            }
            for tag in interest_tags(content) {
                push_unique(&mut prefs.interest_tags, tag);
            }
            if let Some(city) = first_capture(&CITY_PATTERNS[..1], content) {
                push_unique(&mut prefs.preferred_cities, city);
            }
        }
        prefs
    }

    /// Topics discussed anywhere in the transcript
    pub fn identify_topics(&self, messages: &[Message]) -> Vec<String> {
        let all = messages
            .iter()
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join(" ");

        let topics: Vec<String> = TOPIC_KEYWORDS
            .iter()
            .filter(|(_, words)| words.iter().any(|w| all.contains(w)))
            .map(|(topic, _)| topic.to_string())
            .collect();

        if topics.is_empty() {
            vec![DEFAULT_TOPIC.to_string()]
        } else {
            topics
        }
    }

    /// Fit a transcript into `max_messages` turns
    ///
    /// System turns are kept, older dialogue is replaced by one system turn
    /// carrying its summary, and the most recent dialogue follows. The result
    /// never exceeds `max_messages`.
    pub async fn compress_for_context(
        &self,
        messages: &[Message],
        max_messages: usize,
    ) -> Vec<Message> {
        if messages.len() <= max_messages {
            return messages.to_vec();
        }
        if max_messages == 0 {
            return Vec::new();
        }

        let (system, dialog): (Vec<&Message>, Vec<&Message>) =
            messages.iter().partition(|m| m.role == Role::System);

        let system_budget = system.len().min(max_messages - 1);
        if system_budget < system.len() {
            debug!(
                "Dropping {} oldest system messages that exceed the context budget",
                system.len() - system_budget
            );
        }
        let kept_system = &system[system.len() - system_budget..];
        let recent_count = max_messages - 1 - system_budget;
        let split = dialog.len().saturating_sub(recent_count);
        let (early, recent) = dialog.split_at(split);

        let mut compressed: Vec<Message> = kept_system.iter().map(|m| (*m).clone()).collect();

        if early.is_empty() {
            compressed.extend(recent.iter().map(|m| (*m).clone()));
            let excess = compressed.len().saturating_sub(max_messages);
            compressed.drain(..excess);
            return compressed;
        }

        let early: Vec<Message> = early.iter().map(|m| (*m).clone()).collect();
        let summary = self.summarize(&early, CompressionLevel::Moderate).await;
        compressed.push(Message::system(format!(
            "{CONTEXT_SUMMARY_PREFIX}{}",
            summary.summary
        )));
        compressed.extend(recent.iter().map(|m| (*m).clone()));

        debug!(
            "Compressed {} messages into {} for context",
            messages.len(),
            compressed.len()
        );
        compressed
    }

    /// Summarize an archived session's full history
    pub async fn session_report(&self, session: &SessionData) -> SessionReport {
        let summary = self
            .summarize(&session.full_history, CompressionLevel::Moderate)
            .await;

        let duration = session.end_time.map(|end| format_duration(end - session.start_time));

        SessionReport {
            session_id: session.session_id.clone(),
            created_at: session.start_time,
            summary: summary.summary,
            compression_level: summary.compression_level,
            key_facts: summary.key_facts,
            user_preferences: summary.user_preferences,
            topics: summary.topics,
            message_count: session.full_history.len(),
            tokens_saved: summary.tokens_saved,
            duration,
        }
    }
}

impl Default for ConversationSummarizer {
    fn default() -> Self {
        Self::new(SummarizerConfig::default())
    }
}

fn format_duration(duration: chrono::Duration) -> String {
    let total = duration.num_seconds().max(0);
    format!("{}:{:02}:{:02}", total / 3600, (total % 3600) / 60, total % 60)
}
