//! Test utilities - deterministic collaborators for fast tests

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::embedding::EmbeddingProvider;
use crate::error::{Result, VoyageError};
use crate::llm::{ChatResponse, LlmClient, LlmError};
use crate::memory::types::Message;

const MOCK_DIMENSION: usize = 384;

/// Mock embedding model producing deterministic 384-dimensional vectors
/// from a hash of the input text, values in [-1, 1].
#[derive(Debug, Clone, Default)]
pub struct MockEmbeddingModel {
    fail: bool,
}

impl MockEmbeddingModel {
    pub fn new() -> Self {
        Self { fail: false }
    }

    /// A provider whose every call fails
    pub fn failing() -> Self {
        Self { fail: true }
    }

    pub fn embed(&self, text: &str) -> Vec<f32> {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let mut hasher = DefaultHasher::new();
        text.hash(&mut hasher);
        let seed = hasher.finish();

        (0..MOCK_DIMENSION)
            .map(|i| {
                let x = seed
                    .wrapping_mul(i as u64 + 1)
                    .wrapping_add(0x9e3779b97f4a7c15);
                let normalized = (x as f32) / (u64::MAX as f32);
                (normalized * 2.0) - 1.0
            })
            .collect()
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbeddingModel {
    async fn encode(&self, text: &str) -> Result<Vec<f32>> {
        if self.fail {
            return Err(VoyageError::Embedding("mock embedding failure".to_string()));
        }
        Ok(self.embed(text))
    }

    fn dimension(&self) -> usize {
        MOCK_DIMENSION
    }
}

/// Scripted language model
///
/// Replies are returned in order; once exhausted the last reply repeats.
/// Every request is recorded for inspection.
#[derive(Debug, Default)]
pub struct MockLlmClient {
    replies: Mutex<VecDeque<ChatResponse>>,
    fallback: Option<ChatResponse>,
    fail: bool,
    calls: AtomicUsize,
    requests: Mutex<Vec<Vec<Message>>>,
}

impl MockLlmClient {
    pub fn with_replies(replies: Vec<ChatResponse>) -> Self {
        let fallback = replies.last().cloned();
        Self {
            replies: Mutex::new(replies.into()),
            fallback,
            ..Self::default()
        }
    }

    /// Always answer with the same content
    pub fn always(content: impl Into<String>) -> Self {
        Self::with_replies(vec![ChatResponse::ok(content)])
    }

    /// Every call returns an error
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<Vec<Message>> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn chat(&self, messages: &[Message]) -> std::result::Result<ChatResponse, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(messages.to_vec());
        }
        if self.fail {
            return Err(LlmError::ApiError("mock failure".to_string()));
        }
        let next = self.replies.lock().ok().and_then(|mut r| r.pop_front());
        Ok(next
            .or_else(|| self.fallback.clone())
            .unwrap_or_else(ChatResponse::failed))
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_embedding_is_deterministic() {
        let model = MockEmbeddingModel::new();
        assert_eq!(model.embed("hello world"), model.embed("hello world"));
    }

    #[test]
    fn mock_embedding_values_in_range() {
        let model = MockEmbeddingModel::new();
        let emb = model.embed("测试");
        assert_eq!(emb.len(), 384);
        assert!(emb.iter().all(|v| (-1.0..=1.0).contains(v)));
    }

    #[tokio::test]
    async fn failing_embedding_returns_error() {
        let model = MockEmbeddingModel::failing();
        assert!(model.encode("x").await.is_err());
    }

    #[tokio::test]
    async fn mock_llm_replays_in_order_then_repeats_last() {
        let client = MockLlmClient::with_replies(vec![ChatResponse::ok("a"), ChatResponse::ok("b")]);
        let msgs = [Message::user("q")];
        assert_eq!(client.chat(&msgs).await.unwrap().content, "a");
        assert_eq!(client.chat(&msgs).await.unwrap().content, "b");
        assert_eq!(client.chat(&msgs).await.unwrap().content, "b");
        assert_eq!(client.call_count(), 3);
    }

    #[tokio::test]
    async fn failing_llm_counts_calls() {
        let client = MockLlmClient::failing();
        assert!(client.chat(&[Message::user("q")]).await.is_err());
        assert_eq!(client.call_count(), 1);
        assert_eq!(client.requests().len(), 1);
    }
}
