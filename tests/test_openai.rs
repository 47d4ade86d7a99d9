//! Integration tests for the OpenAI provider and the model classification tier
//!
//! Tests behavioral contracts against a mock chat completions endpoint:
//! - request/response handling
//! - error mapping (auth, rate limits, server errors)
//! - retry on server errors only
//! - the classifier falling through when the model is unusable

use doc_triage::classifier::{Classifier, LlmIntentStrategy};
use doc_triage::document::{Format, Intent};
use doc_triage::llm::provider::{
    verify_provider, CompletionRequest, FinishReason, LlmError, LlmProvider, Message,
};
use doc_triage::llm::providers::openai::{OpenAiConfig, OpenAiProvider};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

fn test_config(base_url: &str) -> OpenAiConfig {
    OpenAiConfig {
        api_key: "test-api-key".to_string(),
        base_url: base_url.to_string(),
        timeout: Duration::from_secs(5),
        max_retries: 2,
    }
}

fn test_request() -> CompletionRequest {
    CompletionRequest {
        messages: vec![Message::system("Classify."), Message::user("Hello")],
        model: "gpt-4o-mini".to_string(),
        max_tokens: Some(10),
        temperature: Some(0.0),
        metadata: HashMap::new(),
    }
}

fn completion(content: &str) -> Value {
    json!({
        "id": "chatcmpl-123",
        "object": "chat.completion",
        "created": 1677652288,
        "model": "gpt-4o-mini",
        "choices": [
            {
                "index": 0,
                "message": {"role": "assistant", "content": content},
                "finish_reason": "stop"
            }
        ],
        "usage": {"prompt_tokens": 20, "completion_tokens": 1, "total_tokens": 21}
    })
}

#[tokio::test]
async fn test_successful_completion() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("Authorization", "Bearer test-api-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion("Invoice")))
        .expect(1)
        .mount(&mock_server)
        .await;

    let provider = OpenAiProvider::new(test_config(&mock_server.uri())).unwrap();
    let response = provider.complete(test_request()).await.unwrap();

    assert_eq!(response.content.as_deref(), Some("Invoice"));
    assert_eq!(response.model, "gpt-4o-mini");
    assert_eq!(response.usage.total_tokens, 21);
    assert_eq!(response.finish_reason, FinishReason::Stop);
}

#[tokio::test]
async fn test_request_body_carries_sampling_limits() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion("RFQ")))
        .mount(&mock_server)
        .await;

    let provider = OpenAiProvider::new(test_config(&mock_server.uri())).unwrap();
    provider.complete(test_request()).await.unwrap();

    let received: Vec<Request> = mock_server.received_requests().await.unwrap();
    assert_eq!(received.len(), 1);
    let body: Value = serde_json::from_slice(&received[0].body).unwrap();
    assert_eq!(body["model"], "gpt-4o-mini");
    assert_eq!(body["max_tokens"], 10);
    assert_eq!(body["temperature"], 0.0);
    assert_eq!(body["messages"][0]["role"], "system");
    assert_eq!(body["messages"][1]["content"], "Hello");
}

#[tokio::test]
async fn test_missing_api_key_is_not_configured() {
    let config = OpenAiConfig {
        api_key: String::new(),
        ..Default::default()
    };
    assert!(matches!(
        OpenAiProvider::new(config),
        Err(LlmError::NotConfigured(_))
    ));
}

#[tokio::test]
async fn test_unauthorized_is_not_retried() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
        .expect(1)
        .mount(&mock_server)
        .await;

    let provider = OpenAiProvider::new(test_config(&mock_server.uri())).unwrap();
    let result = provider.complete(test_request()).await;

    assert!(matches!(result, Err(LlmError::AuthenticationFailed(_))));
}

#[tokio::test]
async fn test_rate_limit_maps_to_rate_limit_error() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(429))
        .expect(1)
        .mount(&mock_server)
        .await;

    let provider = OpenAiProvider::new(test_config(&mock_server.uri())).unwrap();
    let result = provider.complete(test_request()).await;

    assert!(matches!(result, Err(LlmError::RateLimitExceeded(_))));
}

#[tokio::test]
async fn test_server_error_is_retried_then_succeeds() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion("Complaint")))
        .mount(&mock_server)
        .await;

    let provider = OpenAiProvider::new(test_config(&mock_server.uri())).unwrap();
    let response = provider.complete(test_request()).await.unwrap();

    assert_eq!(response.content.as_deref(), Some("Complaint"));
    assert_eq!(mock_server.received_requests().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_persistent_server_error_exhausts_retries() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .expect(3)
        .mount(&mock_server)
        .await;

    let provider = OpenAiProvider::new(test_config(&mock_server.uri())).unwrap();
    let result = provider.complete(test_request()).await;

    assert!(matches!(result, Err(LlmError::ApiError(_))));
}

#[tokio::test]
async fn test_empty_choices_is_invalid_response() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"model": "gpt-4o-mini", "choices": []})),
        )
        .mount(&mock_server)
        .await;

    let provider = OpenAiProvider::new(test_config(&mock_server.uri())).unwrap();
    let result = provider.complete(test_request()).await;

    assert!(matches!(result, Err(LlmError::InvalidResponse(_))));
}

async fn models_endpoint(status: u16) -> MockServer {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/models"))
        .and(header("authorization", "Bearer test-api-key"))
        .respond_with(ResponseTemplate::new(status).set_body_json(json!({"data": []})))
        .mount(&mock_server)
        .await;
    mock_server
}

#[tokio::test]
async fn test_startup_check_keeps_healthy_provider() {
    let mock_server = models_endpoint(200).await;
    let provider: Arc<dyn LlmProvider> =
        Arc::new(OpenAiProvider::new(test_config(&mock_server.uri())).unwrap());

    assert!(provider.health_check().await.is_ok());
    let verified = verify_provider(provider, Duration::from_secs(2)).await;
    assert_eq!(verified.map(|p| p.name().to_string()).as_deref(), Some("openai"));
}

#[tokio::test]
async fn test_startup_check_drops_rejected_credentials() {
    let mock_server = models_endpoint(401).await;
    let provider = OpenAiProvider::new(test_config(&mock_server.uri())).unwrap();

    assert!(verify_provider(Arc::new(provider), Duration::from_secs(2))
        .await
        .is_none());
}

#[tokio::test]
async fn test_startup_check_keeps_provider_on_outage() {
    let mock_server = models_endpoint(503).await;
    let provider = OpenAiProvider::new(test_config(&mock_server.uri())).unwrap();

    assert!(matches!(
        provider.health_check().await,
        Err(LlmError::ApiError(_))
    ));
    assert!(verify_provider(Arc::new(provider), Duration::from_secs(2))
        .await
        .is_some());
}

fn classifier_for(server: &MockServer) -> Classifier {
    let provider = OpenAiProvider::new(OpenAiConfig {
        max_retries: 0,
        ..test_config(&server.uri())
    })
    .unwrap();
    Classifier::with_llm(
        LlmIntentStrategy::new(Arc::new(provider), "gpt-4o-mini")
            .with_timeout(Duration::from_secs(2)),
    )
}

#[tokio::test]
async fn test_model_tier_decides_email_intent() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion("Fraud Risk")))
        .expect(1)
        .mount(&mock_server)
        .await;

    let intent = classifier_for(&mock_server)
        .detect_intent(
            Format::Email,
            "From: a@b.com\nSubject: Payment\n\nPlease wire the funds today.",
        )
        .await;

    assert_eq!(intent, Intent::FraudRisk);
}

#[tokio::test]
async fn test_schema_match_skips_the_model() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion("RFQ")))
        .expect(0)
        .mount(&mock_server)
        .await;

    let intent = classifier_for(&mock_server)
        .detect_intent(
            Format::Json,
            r#"{"order_id": 1, "customer": "Alice", "amount": 5}"#,
        )
        .await;

    assert_eq!(intent, Intent::Invoice);
}

#[tokio::test]
async fn test_model_failure_falls_through_to_keywords() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&mock_server)
        .await;

    let intent = classifier_for(&mock_server)
        .detect_intent(
            Format::Email,
            "Subject: Help\n\nI have a complaint about my order.",
        )
        .await;

    assert_eq!(intent, Intent::Complaint);
}

#[tokio::test]
async fn test_unrecognised_model_answer_falls_through() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion("Banana")))
        .mount(&mock_server)
        .await;

    let intent = classifier_for(&mock_server)
        .detect_intent(Format::Email, "Subject: Hello\n\nJust saying hi.")
        .await;

    assert_eq!(intent, Intent::Unknown);
}
