//! Integration tests for the OpenAI-compatible chat adapter
//!
//! A wiremock server stands in for the completion endpoint so retries,
//! failures and timeouts can be exercised without network access.

use std::sync::Arc;
use std::time::Duration;

use wiremock::{Mock, MockServer, ResponseTemplate, matchers};

use voyage_memory::config::LlmConfig;
use voyage_memory::llm::{LlmClient, LlmError, RemoteLlmClient};
use voyage_memory::memory::{CompressionLevel, ConversationSummarizer, ImportanceScorer, Message};

fn config_for(server: &MockServer, timeout_secs: u64) -> LlmConfig {
    LlmConfig {
        enabled: true,
        api_url: format!("{}/v1", server.uri()),
        model: "test-model".to_string(),
        timeout_secs,
        ..LlmConfig::default()
    }
}

fn completion(content: &str) -> serde_json::Value {
    serde_json::json!({
        "choices": [{ "message": { "role": "assistant", "content": content } }]
    })
}

#[tokio::test]
async fn test_chat_success() {
    let server = MockServer::start().await;
    Mock::given(matchers::method("POST"))
        .and(matchers::path("/v1/chat/completions"))
        .and(matchers::header("authorization", "Bearer test-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion("0.8")))
        .expect(1)
        .mount(&server)
        .await;

    let client = RemoteLlmClient::with_api_key(&config_for(&server, 5), "test-key").unwrap();
    let response = client
        .chat(&[Message::system("sys"), Message::user("hello")])
        .await
        .unwrap();

    assert!(response.success);
    assert_eq!(response.content, "0.8");

    let requests = server.received_requests().await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(body["model"], "test-model");
    assert_eq!(body["messages"][1]["role"], "user");
    assert_eq!(body["messages"][1]["content"], "hello");
}

#[tokio::test]
async fn test_rate_limit_is_retried() {
    let server = MockServer::start().await;
    Mock::given(matchers::method("POST"))
        .respond_with(ResponseTemplate::new(429))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(matchers::method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion("ok")))
        .mount(&server)
        .await;

    let client = RemoteLlmClient::with_api_key(&config_for(&server, 5), "k").unwrap();
    let response = client.chat(&[Message::user("hi")]).await.unwrap();

    assert_eq!(response.content, "ok");
    assert_eq!(server.received_requests().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_server_error_is_reported() {
    let server = MockServer::start().await;
    Mock::given(matchers::method("POST"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;

    let client = RemoteLlmClient::with_api_key(&config_for(&server, 5), "k").unwrap();
    let err = client.chat(&[Message::user("hi")]).await.unwrap_err();

    match err {
        LlmError::ApiError(msg) => assert!(msg.contains("boom")),
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_empty_content_is_unsuccessful() {
    let server = MockServer::start().await;
    Mock::given(matchers::method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion("   ")))
        .mount(&server)
        .await;

    let client = RemoteLlmClient::with_api_key(&config_for(&server, 5), "k").unwrap();
    let response = client.chat(&[Message::user("hi")]).await.unwrap();
    assert!(!response.success);
}

#[tokio::test]
async fn test_slow_server_times_out() {
    let server = MockServer::start().await;
    Mock::given(matchers::method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(completion("late"))
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&server)
        .await;

    let client = RemoteLlmClient::with_api_key(&config_for(&server, 1), "k").unwrap();
    let err = client.chat(&[Message::user("hi")]).await.unwrap_err();
    assert!(matches!(err, LlmError::Timeout(_)));
}

#[tokio::test]
async fn test_scorer_blends_remote_estimate() {
    let server = MockServer::start().await;
    Mock::given(matchers::method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion("1.0")))
        .mount(&server)
        .await;

    let client = RemoteLlmClient::with_api_key(&config_for(&server, 5), "k").unwrap();
    let message = "我想去北京旅游，预算5000元，3天时间";

    let rules_only = ImportanceScorer::default().score(message, None).await;
    let blended = ImportanceScorer::default()
        .with_llm(Arc::new(client))
        .score(message, None)
        .await;

    assert!(blended.total > rules_only.total);
    assert!(blended.total <= 1.0);
}

#[tokio::test]
async fn test_summarizer_falls_back_when_remote_fails() {
    let server = MockServer::start().await;
    Mock::given(matchers::method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let client = RemoteLlmClient::with_api_key(&config_for(&server, 5), "k").unwrap();
    let summarizer = ConversationSummarizer::default().with_llm(Arc::new(client));
    let messages = vec![
        Message::user("我想去成都旅游，预算3000元"),
        Message::assistant("成都美食很多"),
    ];

    let with_remote = summarizer.summarize(&messages, CompressionLevel::Moderate).await;
    let rules = ConversationSummarizer::default()
        .summarize(&messages, CompressionLevel::Moderate)
        .await;
    assert_eq!(with_remote.summary, rules.summary);
}
