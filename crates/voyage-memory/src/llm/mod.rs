//! Language model collaborator
//!
//! The memory components only ever use the model opportunistically: every
//! call site has a deterministic fallback, and failures are logged and
//! swallowed through [`complete`].

pub mod prompts;
pub mod remote;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::LlmConfig;
use crate::memory::types::Message;

pub use remote::RemoteLlmClient;

/// Upper bound on a single completion, independent of the adapter's own timeout
const COMPLETION_TIMEOUT: Duration = Duration::from_secs(60);

/// Errors raised by language model adapters
#[derive(Error, Debug)]
pub enum LlmError {
    #[error("API error: {0}")]
    ApiError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),
}

/// Reply from a chat completion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatResponse {
    pub success: bool,
    pub content: String,
}

impl ChatResponse {
    pub fn ok(content: impl Into<String>) -> Self {
        Self {
            success: true,
            content: content.into(),
        }
    }

    pub fn failed() -> Self {
        Self {
            success: false,
            content: String::new(),
        }
    }
}

/// Chat-style language model
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn chat(&self, messages: &[Message]) -> Result<ChatResponse, LlmError>;

    /// Adapter name for logging
    fn name(&self) -> &'static str;
}

/// Run a system + user prompt and return the trimmed reply
///
/// Returns `None` when the call fails, times out, reports `success: false`
/// or comes back empty. Callers fall back to their rule-based path.
pub async fn complete(client: &dyn LlmClient, system: &str, prompt: &str) -> Option<String> {
    let messages = [Message::system(system), Message::user(prompt)];
    match tokio::time::timeout(COMPLETION_TIMEOUT, client.chat(&messages)).await {
        Ok(Ok(response)) if response.success && !response.content.trim().is_empty() => {
            debug!("{} completion returned {} chars", client.name(), response.content.len());
            Some(response.content.trim().to_string())
        }
        Ok(Ok(_)) => {
            warn!("{} completion was unsuccessful, using fallback", client.name());
            None
        }
        Ok(Err(e)) => {
            warn!("{} completion failed, using fallback: {}", client.name(), e);
            None
        }
        Err(_) => {
            warn!(
                "{} completion timed out after {:?}, using fallback",
                client.name(),
                COMPLETION_TIMEOUT
            );
            None
        }
    }
}

/// Remote client when the model is enabled and reachable by config
///
/// A missing API key or bad URL is logged and leaves the model off.
pub fn from_config(config: &LlmConfig) -> Option<Arc<dyn LlmClient>> {
    if !config.enabled {
        info!("Language model disabled, using rule-based paths only");
        return None;
    }
    match RemoteLlmClient::new(config) {
        Ok(client) => Some(Arc::new(client)),
        Err(e) => {
            warn!("Language model unavailable, using rule-based paths only: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockLlmClient;

    #[test]
    fn test_from_config_disabled() {
        assert!(from_config(&LlmConfig::default()).is_none());
    }

    #[test]
    fn test_from_config_missing_key() {
        let config = LlmConfig {
            enabled: true,
            api_url: "https://api.example.com/v1".to_string(),
            api_key_env: "VOYAGE_TEST_FROM_CONFIG_UNSET".to_string(),
            ..LlmConfig::default()
        };
        unsafe { std::env::remove_var("VOYAGE_TEST_FROM_CONFIG_UNSET") };
        assert!(from_config(&config).is_none());
    }

    #[tokio::test]
    async fn test_complete_returns_trimmed_content() {
        let client = MockLlmClient::with_replies(vec![ChatResponse::ok("  摘要内容 \n")]);
        let result = complete(&client, "sys", "prompt").await;
        assert_eq!(result.as_deref(), Some("摘要内容"));
        assert_eq!(client.call_count(), 1);
    }

    #[tokio::test]
    async fn test_complete_unsuccessful_is_none() {
        let client = MockLlmClient::with_replies(vec![ChatResponse::failed()]);
        assert!(complete(&client, "sys", "prompt").await.is_none());
    }

    #[tokio::test]
    async fn test_complete_error_is_none() {
        let client = MockLlmClient::failing();
        assert!(complete(&client, "sys", "prompt").await.is_none());
    }

    #[tokio::test]
    async fn test_complete_blank_is_none() {
        let client = MockLlmClient::with_replies(vec![ChatResponse::ok("   ")]);
        assert!(complete(&client, "sys", "prompt").await.is_none());
    }

    #[tokio::test]
    async fn test_complete_sends_system_then_user() {
        let client = MockLlmClient::with_replies(vec![ChatResponse::ok("ok")]);
        complete(&client, "你是助手", "问题").await;
        let requests = client.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0][0], Message::system("你是助手"));
        assert_eq!(requests[0][1], Message::user("问题"));
    }
}
