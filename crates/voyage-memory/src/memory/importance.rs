//! Importance scoring for incoming dialogue turns
//!
//! A message is scored along five capped dimensions using lexicon and
//! pattern matching. When a language model is configured and the rule-based
//! total clears the activation threshold, the model's own estimate is blended
//! in. Model failures never change the deterministic result.

use futures::future::join_all;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, LazyLock};
use tracing::debug;

use crate::llm::{self, LlmClient, prompts};

/// Scoring dimensions
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dimension {
    Keyword,
    Intent,
    Sentiment,
    Decision,
    Preference,
}

impl Dimension {
    /// Upper bound of this dimension's contribution
    pub fn cap(&self) -> f32 {
        match self {
            Dimension::Keyword => 0.25,
            Dimension::Intent => 0.35,
            Dimension::Sentiment => 0.25,
            Dimension::Decision => 0.30,
            Dimension::Preference => 0.25,
        }
    }
}

/// Result of scoring one message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportanceScore {
    /// Combined score in [0.0, 1.0]
    pub total: f32,
    pub dimensions: BTreeMap<Dimension, f32>,
    pub reasons: Vec<String>,
    pub is_high_importance: bool,
}

impl ImportanceScore {
    pub fn dimension(&self, dimension: Dimension) -> f32 {
        self.dimensions.get(&dimension).copied().unwrap_or(0.0)
    }
}

/// Scorer thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScorerConfig {
    /// Total at or above which a message is high importance
    #[serde(default = "default_high_importance_threshold")]
    pub high_importance_threshold: f32,
    /// Minimum rule-based total before the language model is consulted
    #[serde(default = "default_llm_activation_threshold")]
    pub llm_activation_threshold: f32,
    /// Share of the blended total taken from the model estimate
    #[serde(default = "default_llm_weight")]
    pub llm_weight: f32,
}

impl Default for ScorerConfig {
    fn default() -> Self {
        Self {
            high_importance_threshold: default_high_importance_threshold(),
            llm_activation_threshold: default_llm_activation_threshold(),
            llm_weight: default_llm_weight(),
        }
    }
}

fn default_high_importance_threshold() -> f32 {
    0.5
}

fn default_llm_activation_threshold() -> f32 {
    0.3
}

fn default_llm_weight() -> f32 {
    0.3
}

const TRAVEL_KEYWORDS: &[(&str, f32)] = &[
    // destination
    ("想去", 0.15),
    ("要去", 0.15),
    ("旅游", 0.12),
    ("旅行", 0.12),
    ("游玩", 0.10),
    ("度假", 0.12),
    ("出发", 0.10),
    ("行程", 0.15),
    // budget
    ("预算", 0.18),
    ("花费", 0.15),
    ("费用", 0.15),
    ("钱", 0.10),
    ("便宜", 0.08),
    ("贵", 0.08),
    ("性价比", 0.12),
    // timing
    ("几天", 0.15),
    ("多少天", 0.15),
    ("时间", 0.10),
    ("什么时候", 0.12),
    ("季节", 0.12),
    ("春天", 0.08),
    ("夏天", 0.08),
    ("秋天", 0.08),
    ("冬天", 0.08),
    // preference
    ("喜欢", 0.18),
    ("想要", 0.12),
    ("偏好", 0.15),
    ("兴趣", 0.12),
    ("美食", 0.10),
    ("历史", 0.10),
    ("自然", 0.10),
    ("风景", 0.10),
    // decision
    ("决定", 0.20),
    ("选择", 0.15),
    ("确定", 0.15),
    ("订", 0.18),
    ("预约", 0.18),
    ("预订", 0.18),
    ("买票", 0.18),
];

static INTENT_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"我想去(.+)",
        r"推荐(.+)",
        r"帮我(.+)",
        r"计划(.+)",
        r"安排(.+)",
        r"怎么去(.+)",
        r"(.+)三日游",
        r"(.+)一日游",
        r"(.+)攻略",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("valid regex"))
    .collect()
});

static DIGITS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d+").expect("valid regex"));

static LLM_SCORE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d+(?:\.\d+)?").expect("valid regex"));

const REQUEST_VERBS: &[&str] = &["推荐", "建议", "帮忙", "告诉", "介绍", "规划"];

const STRONG_EMOTION_WORDS: &[&str] = &[
    "非常", "特别", "极其", "超级", "太", "好", "棒", "赞", "期待", "兴奋", "开心", "喜欢", "想",
    "要", "不喜欢", "讨厌", "失望", "无聊", "累",
];

const NEGATIONS: &[&str] = &["不", "没", "无", "非"];

const NUMERIC_UNITS: &[&str] = &["天", "元", "块", "千", "百", "周", "月"];

const CONJUNCTIONS: &[&str] = &["，然后", "，还有", "以及"];

const COMPARATIVES: &[&str] = &["最好", "比较", "更", "最", "第一"];

const PREFERENCE_EXPRESSIONS: &[(&str, f32)] = &[
    ("我喜欢", 0.12),
    ("我想要", 0.10),
    ("我偏好", 0.15),
    ("我不喜欢", 0.10),
    ("讨厌", 0.08),
    ("曾经去过", 0.08),
    ("已经去过", 0.08),
];

const INTEREST_WEIGHTS: &[(&str, f32)] = &[
    ("美食", 0.08),
    ("历史", 0.08),
    ("文化", 0.08),
    ("自然", 0.08),
    ("风景", 0.08),
    ("海滩", 0.08),
    ("购物", 0.06),
    ("休闲", 0.06),
    ("探险", 0.08),
];

fn score_keyword(message: &str) -> f32 {
    let score: f32 = TRAVEL_KEYWORDS
        .iter()
        .filter(|(kw, _)| message.contains(kw))
        .map(|(_, w)| w)
        .sum();
    score.min(Dimension::Keyword.cap())
}

fn score_intent(message: &str) -> f32 {
    let mut score = 0.0;
    if INTENT_PATTERNS.iter().any(|re| re.is_match(message)) {
        score += 0.15;
    }
    if REQUEST_VERBS.iter().any(|v| message.contains(v)) {
        score += 0.08;
    }
    f32::min(score, Dimension::Intent.cap())
}

fn score_sentiment(message: &str) -> f32 {
    let mut score: f32 = STRONG_EMOTION_WORDS
        .iter()
        .filter(|w| message.contains(*w))
        .map(|_| 0.05)
        .sum();
    if score > 0.0 && NEGATIONS.iter().any(|n| message.contains(n)) {
        score -= 0.02;
    }
    score.clamp(0.0, Dimension::Sentiment.cap())
}

fn score_decision(message: &str) -> f32 {
    let mut score = 0.0;
    if DIGITS.is_match(message) {
        if NUMERIC_UNITS.iter().any(|u| message.contains(u)) {
            score += 0.12;
        } else {
            score += 0.03;
        }
    }
    if CONJUNCTIONS.iter().any(|c| message.contains(c)) {
        score += 0.10;
    }
    if COMPARATIVES.iter().any(|c| message.contains(c)) {
        score += 0.05;
    }
    f32::min(score, Dimension::Decision.cap())
}

fn score_preference(message: &str) -> f32 {
    let expression = PREFERENCE_EXPRESSIONS
        .iter()
        .find(|(expr, _)| message.contains(expr))
        .map(|(_, w)| *w)
        .unwrap_or(0.0);
    let interests: f32 = INTEREST_WEIGHTS
        .iter()
        .filter(|(tag, _)| message.contains(tag))
        .map(|(_, w)| w)
        .sum();
    (expression + interests).min(Dimension::Preference.cap())
}

/// Extract a score in [0, 1] from free-form model output
fn parse_llm_score(content: &str) -> Option<f32> {
    LLM_SCORE
        .find(content)
        .and_then(|m| m.as_str().parse::<f32>().ok())
        .map(|s| s.clamp(0.0, 1.0))
}

/// Multi-dimensional importance scorer
pub struct ImportanceScorer {
    config: ScorerConfig,
    llm: Option<Arc<dyn LlmClient>>,
}

impl ImportanceScorer {
    pub fn new(config: ScorerConfig) -> Self {
        Self { config, llm: None }
    }

    pub fn with_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    pub fn config(&self) -> &ScorerConfig {
        &self.config
    }

    /// Rule-based score, no model involvement
    pub fn score_rules(&self, message: &str) -> ImportanceScore {
        let mut dimensions = BTreeMap::new();
        let mut reasons = Vec::new();

        let keyword = score_keyword(message);
        dimensions.insert(Dimension::Keyword, keyword);
        if keyword > 0.1 {
            reasons.push(format!("包含旅行相关关键词 (+{keyword:.2})"));
        }

        let intent = score_intent(message);
        dimensions.insert(Dimension::Intent, intent);
        if intent > 0.15 {
            reasons.push(format!("用户意图明确 (+{intent:.2})"));
        }

        let sentiment = score_sentiment(message);
        dimensions.insert(Dimension::Sentiment, sentiment);
        if sentiment > 0.1 {
            reasons.push(format!("情感表达强烈 (+{sentiment:.2})"));
        }

        let decision = score_decision(message);
        dimensions.insert(Dimension::Decision, decision);
        if decision > 0.15 {
            reasons.push(format!("包含关键决策信息 (+{decision:.2})"));
        }

        let preference = score_preference(message);
        dimensions.insert(Dimension::Preference, preference);
        if preference > 0.1 {
            reasons.push(format!("包含用户偏好信息 (+{preference:.2})"));
        }

        if reasons.is_empty() {
            reasons.push("一般对话内容".to_string());
        }

        let total = dimensions.values().sum::<f32>().min(1.0);
        self.finish(total, dimensions, reasons)
    }

    /// Score a message, refining with the language model when configured
    pub async fn score(&self, message: &str, context: Option<&str>) -> ImportanceScore {
        let rules = self.score_rules(message);

        let Some(client) = &self.llm else {
            return rules;
        };
        if rules.total < self.config.llm_activation_threshold {
            return rules;
        }

        let mut prompt = prompts::IMPORTANCE_PROMPT.replace("{message}", message);
        if let Some(context) = context.filter(|c| !c.trim().is_empty()) {
            prompt.push_str("\n\n对话上下文：");
            prompt.push_str(context);
        }

        let estimate = llm::complete(client.as_ref(), prompts::IMPORTANCE_SYSTEM, &prompt)
            .await
            .and_then(|reply| parse_llm_score(&reply));

        let Some(estimate) = estimate else {
            return rules;
        };

        debug!("Blending model estimate {:.2} into score {:.2}", estimate, rules.total);
        let weight = self.config.llm_weight;
        let total = rules.total * (1.0 - weight) + estimate * weight;
        let mut dimensions = rules.dimensions;
        let intent = dimensions.get(&Dimension::Intent).copied().unwrap_or(0.0);
        dimensions.insert(Dimension::Intent, intent * 0.5 + estimate * 0.5);

        self.finish(total, dimensions, rules.reasons)
    }

    /// Score many messages concurrently, preserving input order
    pub async fn batch_score<S: AsRef<str>>(&self, messages: &[S]) -> Vec<ImportanceScore> {
        join_all(messages.iter().map(|m| self.score(m.as_ref(), None))).await
    }

    fn finish(
        &self,
        total: f32,
        dimensions: BTreeMap<Dimension, f32>,
        reasons: Vec<String>,
    ) -> ImportanceScore {
        let total = total.clamp(0.0, 1.0);
        ImportanceScore {
            total,
            dimensions,
            reasons,
            is_high_importance: total >= self.config.high_importance_threshold,
        }
    }
}

impl Default for ImportanceScorer {
    fn default() -> Self {
        Self::new(ScorerConfig::default())
    }
}
