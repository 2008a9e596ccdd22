//! Integration tests for scoring, the short-term store and summarization
//!
//! Covers the properties every caller relies on:
//! - score bounds and threshold consistency
//! - the eviction ceiling and FIFO order
//! - summary and context compression bounds

use std::sync::Arc;

use chrono::{Duration, Utc};

use voyage_memory::llm::ChatResponse;
use voyage_memory::memory::{
    CompressionLevel, ConversationSummarizer, Dimension, EvictionConfig, EvictionManager,
    EvictionStrategy, ImportanceScorer, MemoryItem, Message, Role, ScorerConfig, SessionData,
};
use voyage_memory::testing::MockLlmClient;

const SAMPLE_MESSAGES: &[&str] = &[
    "",
    "收到",
    "好的谢谢",
    "我想去北京旅游，预算5000元，3天时间",
    "必须要有海景房，我决定了，就去三亚！",
    "喜欢美食和历史，不喜欢购物",
    "太贵了，预算只有2000块",
    "帮我规划一下行程，推荐几个景点",
    "abc xyz 123",
];

// =============================================================================
// Importance scoring
// =============================================================================

#[tokio::test]
async fn test_scores_bounded_and_consistent() {
    let configs = [
        ScorerConfig::default(),
        ScorerConfig {
            high_importance_threshold: 0.2,
            ..ScorerConfig::default()
        },
    ];

    for config in configs {
        let threshold = config.high_importance_threshold;
        let scorer = ImportanceScorer::new(config);
        for message in SAMPLE_MESSAGES {
            let score = scorer.score(message, None).await;
            assert!(
                (0.0..=1.0).contains(&score.total),
                "{message}: {}",
                score.total
            );
            assert_eq!(score.is_high_importance, score.total >= threshold);
            for (dimension, value) in &score.dimensions {
                assert!(*value <= dimension.cap() + 1e-6);
            }
        }
    }
}

#[tokio::test]
async fn test_trip_request_activates_core_dimensions() {
    let score = ImportanceScorer::default()
        .score("我想去北京旅游，预算5000元，3天时间", None)
        .await;

    assert!(score.dimension(Dimension::Keyword) > 0.0);
    assert!(score.dimension(Dimension::Intent) > 0.0);
    assert!(score.dimension(Dimension::Decision) > 0.0);
    assert!(score.total > 0.5);
    assert!(score.is_high_importance);
}

#[tokio::test]
async fn test_batch_score_isolates_failures() {
    let llm = Arc::new(MockLlmClient::with_replies(vec![
        ChatResponse::ok("0.9"),
        ChatResponse::failed(),
        ChatResponse::ok("not a number"),
    ]));
    let scorer = ImportanceScorer::default().with_llm(llm);
    let rules = ImportanceScorer::default();

    let messages = SAMPLE_MESSAGES.to_vec();
    let scores = scorer.batch_score(&messages).await;

    assert_eq!(scores.len(), messages.len());
    for (message, score) in messages.iter().zip(&scores) {
        assert!((0.0..=1.0).contains(&score.total));
        // a failed or unparsable model reply leaves the rule score intact
        let baseline = rules.score_rules(message);
        if score.total != baseline.total {
            assert!(baseline.total >= scorer.config().llm_activation_threshold);
        }
    }
}

// =============================================================================
// Short-term store
// =============================================================================

#[test]
fn test_fifo_evicts_oldest() {
    let mut store = EvictionManager::new(EvictionConfig::new(2, 0.3, 0.2, EvictionStrategy::Fifo));
    let now = Utc::now();

    store.add(MemoryItem::new("A", "a", 0.5).with_created_at(now - Duration::minutes(3)));
    store.add(MemoryItem::new("B", "b", 0.5).with_created_at(now - Duration::minutes(2)));
    let evicted = store.add(MemoryItem::new("C", "c", 0.5).with_created_at(now - Duration::minutes(1)));

    assert!(evicted);
    assert!(!store.contains("A"));
    assert!(store.contains("B"));
    assert!(store.contains("C"));
    assert_eq!(store.len(), 2);
}

#[test]
fn test_ceiling_holds_for_every_strategy() {
    let strategies = [
        EvictionStrategy::Fifo,
        EvictionStrategy::Lfu,
        EvictionStrategy::Lru,
        EvictionStrategy::Priority,
        EvictionStrategy::Hybrid,
        EvictionStrategy::Adaptive,
    ];

    for strategy in strategies {
        let config = EvictionConfig::new(5, 0.3, 0.2, strategy);
        let ceiling = config.physical_capacity();
        let mut store = EvictionManager::new(config);

        for i in 0..50 {
            let importance = (i % 10) as f32 / 10.0;
            store.add(MemoryItem::new(format!("m{i}"), format!("内容{i}"), importance));
            if i % 3 == 0 {
                store.access(&format!("m{}", i / 2));
            }
            assert!(store.len() <= ceiling, "{strategy}: {} > {ceiling}", store.len());
        }
        assert!(store.stats().total_evictions > 0);
    }
}

#[test]
fn test_full_store_evicts_or_stays_bounded() {
    let config = EvictionConfig::new(3, 0.3, 0.0, EvictionStrategy::Hybrid);
    let mut store = EvictionManager::new(config);
    for i in 0..3 {
        store.add(MemoryItem::new(format!("m{i}"), "x", 0.8));
    }
    assert!(store.should_evict());

    let evicted = store.add(MemoryItem::new("new", "y", 0.8));
    assert!(evicted);
    assert_eq!(store.len(), 3);
    assert!(store.contains("new"));
}

// =============================================================================
// Summarization
// =============================================================================

#[tokio::test]
async fn test_empty_light_summary() {
    let summary = ConversationSummarizer::default()
        .summarize(&[], CompressionLevel::Light)
        .await;

    assert_eq!(summary.summary, "空对话");
    assert!(summary.key_facts.is_empty());
    assert!(summary.topics.is_empty());
    assert_eq!(summary.message_count_before, 0);
}

fn dialogue(turns: usize) -> Vec<Message> {
    (0..turns)
        .map(|i| {
            let role = match i % 3 {
                0 => Role::User,
                1 => Role::Assistant,
                _ => Role::System,
            };
            Message::new(role, format!("第{i}轮，预算{}元", 1000 + i))
        })
        .collect()
}

#[tokio::test]
async fn test_compress_for_context_bounds() {
    let summarizer = ConversationSummarizer::default();

    for len in 0..15 {
        let messages = dialogue(len);
        for max in 1..8 {
            let compressed = summarizer.compress_for_context(&messages, max).await;
            if len <= max {
                assert_eq!(compressed, messages);
            } else {
                assert!(
                    compressed.len() <= max,
                    "len {len} max {max} gave {}",
                    compressed.len()
                );
            }
        }
    }
}

#[tokio::test]
async fn test_compress_uses_model_summary_when_available() {
    let llm = Arc::new(MockLlmClient::always("用户计划北京三日游"));
    let summarizer = ConversationSummarizer::default().with_llm(llm);
    let messages: Vec<Message> = (0..12)
        .map(|i| Message::user(format!("消息{i}")))
        .collect();

    let compressed = summarizer.compress_for_context(&messages, 4).await;
    assert!(compressed.len() <= 4);
    assert!(
        compressed
            .iter()
            .any(|m| m.role == Role::System && m.content.contains("用户计划北京三日游"))
    );
    assert_eq!(compressed.last(), messages.last());
}

#[tokio::test]
async fn test_session_report() {
    let start = Utc::now() - Duration::minutes(90);
    let mut session = SessionData::new("s1", Some("u1".to_string()))
        .with_start_time(start)
        .with_history(vec![
            Message::user("我想去西安旅游，预算4000元"),
            Message::assistant("西安历史古迹很多"),
            Message::user("玩4天"),
        ]);
    session.end_time = Some(start + Duration::seconds(5400));

    let report = ConversationSummarizer::default().session_report(&session).await;
    assert_eq!(report.session_id, "s1");
    assert_eq!(report.message_count, 3);
    assert_eq!(report.compression_level, CompressionLevel::Moderate);
    assert_eq!(report.duration.as_deref(), Some("1:30:00"));
    assert_eq!(report.user_preferences.budget, Some(4000));
    assert_eq!(report.user_preferences.travel_days, Some(4));
}
