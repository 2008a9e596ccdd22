//! Chat client for OpenAI-compatible APIs
//!
//! Endpoint, model and API key (via environment variable) come from
//! [`LlmConfig`]. Rate-limited requests are retried with exponential backoff.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::LlmConfig;
use crate::llm::{ChatResponse, LlmClient, LlmError};
use crate::memory::types::Message;

const MAX_RETRIES: u32 = 3;

/// Language model reached over HTTP
#[derive(Debug)]
pub struct RemoteLlmClient {
    client: Client,
    config: LlmConfig,
    endpoint: String,
    api_key: String,
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

impl RemoteLlmClient {
    /// Create a client reading the API key from `config.api_key_env`
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        let api_key = env::var(&config.api_key_env).map_err(|_| {
            LlmError::ConfigError(format!("API key env var '{}' not set", config.api_key_env))
        })?;
        Self::with_api_key(config, api_key)
    }

    /// Create a client with an explicit API key
    pub fn with_api_key(config: &LlmConfig, api_key: impl Into<String>) -> Result<Self, LlmError> {
        let base = url::Url::parse(&config.api_url)
            .map_err(|e| LlmError::ConfigError(format!("Invalid api_url '{}': {e}", config.api_url)))?;
        let endpoint = format!("{}/chat/completions", base.as_str().trim_end_matches('/'));

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| LlmError::ApiError(e.to_string()))?;

        info!(
            "RemoteLlmClient initialized with model: {}, endpoint: {}",
            config.model, endpoint
        );

        Ok(Self {
            client,
            config: config.clone(),
            endpoint,
            api_key: api_key.into(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl LlmClient for RemoteLlmClient {
    async fn chat(&self, messages: &[Message]) -> Result<ChatResponse, LlmError> {
        let request = ChatCompletionRequest {
            model: &self.config.model,
            messages,
            temperature: self.config.temperature,
        };

        debug!("Calling chat completions at: {}", self.endpoint);

        let mut last_error = None;
        let mut delay = Duration::from_secs(1);

        for attempt in 0..MAX_RETRIES {
            match self
                .client
                .post(&self.endpoint)
                .bearer_auth(&self.api_key)
                .json(&request)
                .send()
                .await
            {
                Ok(response) => {
                    let status = response.status();

                    if status.as_u16() == 429 {
                        warn!(
                            "Rate limited on attempt {}/{}, waiting {:?}",
                            attempt + 1,
                            MAX_RETRIES,
                            delay
                        );
                        last_error = Some(format!("rate limited ({status})"));
                        tokio::time::sleep(delay).await;
                        delay *= 2;
                        continue;
                    }

                    if !status.is_success() {
                        let error_text = response
                            .text()
                            .await
                            .unwrap_or_else(|_| "Unknown error".to_string());
                        return Err(LlmError::ApiError(format!(
                            "API returned {status}: {error_text}"
                        )));
                    }

                    let completion: ChatCompletionResponse = response
                        .json()
                        .await
                        .map_err(|e| LlmError::ParseError(e.to_string()))?;

                    let content = completion
                        .choices
                        .into_iter()
                        .next()
                        .and_then(|c| c.message.content)
                        .unwrap_or_default();

                    if content.trim().is_empty() {
                        return Ok(ChatResponse::failed());
                    }
                    return Ok(ChatResponse::ok(content));
                }
                Err(e) if e.is_timeout() => {
                    return Err(LlmError::Timeout(Duration::from_secs(self.config.timeout_secs)));
                }
                Err(e) => {
                    let err_msg = e.to_string();
                    last_error = Some(err_msg.clone());
                    if attempt < MAX_RETRIES - 1 {
                        warn!(
                            "Request failed on attempt {}/{}, retrying: {}",
                            attempt + 1,
                            MAX_RETRIES,
                            err_msg
                        );
                        tokio::time::sleep(delay).await;
                        delay *= 2;
                    }
                }
            }
        }

        Err(LlmError::ApiError(format!(
            "Failed after {} retries: {}",
            MAX_RETRIES,
            last_error.unwrap_or_else(|| "Unknown error".to_string())
        )))
    }

    fn name(&self) -> &'static str {
        "remote"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_config(api_url: &str, api_key_env: &str) -> LlmConfig {
        LlmConfig {
            enabled: true,
            api_url: api_url.to_string(),
            api_key_env: api_key_env.to_string(),
            ..LlmConfig::default()
        }
    }

    #[test]
    fn test_new_missing_api_key() {
        unsafe { env::remove_var("VOYAGE_TEST_MISSING_KEY") };

        let config = create_test_config("https://api.example.com/v1", "VOYAGE_TEST_MISSING_KEY");
        let err = RemoteLlmClient::new(&config).unwrap_err().to_string();
        assert!(err.contains("VOYAGE_TEST_MISSING_KEY"));
    }

    #[test]
    fn test_new_reads_env_key() {
        unsafe { env::set_var("VOYAGE_TEST_PRESENT_KEY", "secret") };

        let config = create_test_config("https://api.example.com/v1", "VOYAGE_TEST_PRESENT_KEY");
        let client = RemoteLlmClient::new(&config).unwrap();
        assert_eq!(client.api_key, "secret");
    }

    #[test]
    fn test_endpoint_joins_path() {
        let config = create_test_config("https://api.example.com/v1/", "UNUSED");
        let client = RemoteLlmClient::with_api_key(&config, "k").unwrap();
        assert_eq!(client.endpoint(), "https://api.example.com/v1/chat/completions");
    }

    #[test]
    fn test_invalid_url_rejected() {
        let config = create_test_config("not a url", "UNUSED");
        let result = RemoteLlmClient::with_api_key(&config, "k");
        assert!(matches!(result, Err(LlmError::ConfigError(_))));
    }

    #[test]
    fn test_request_serialization() {
        let messages = [Message::system("s"), Message::user("u")];
        let request = ChatCompletionRequest {
            model: "m",
            messages: &messages,
            temperature: 0.5,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["model"], "m");
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["content"], "u");
    }
}
