//! OpenAI engine against a WireMock server.

use lexis::config::RetryConfig;
use lexis::engine::{Classifier, ClassifierFactory};
use lexis::error::ClassifyError;
use lexis::events::TracingSink;
use lexis::openai_engine::{OpenAiClassifier, OpenAiConfig};
use lexis::retry::RetryingClassifier;
use lexis::types::{ClassificationResult, Entry, Label, TaskSpec};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn completion(content: &str) -> serde_json::Value {
    json!({
        "id": "chatcmpl-123",
        "object": "chat.completion",
        "created": 1677652288,
        "model": "gpt-4o-mini",
        "choices": [{
            "index": 0,
            "message": { "role": "assistant", "content": content },
            "finish_reason": "stop"
        }]
    })
}

fn classifier(server: &MockServer) -> OpenAiClassifier {
    OpenAiClassifier::new(OpenAiConfig {
        api_base: server.uri(),
        api_key: "sk-test".into(),
        model: "gpt-4o-mini".into(),
        labels: vec!["formal".into(), "neutral".into(), "slang".into()],
        fallback_label: None,
        instructions: None,
    })
    .expect("classifier should build")
}

#[tokio::test]
async fn classifies_entry_text() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer sk-test"))
        .and(body_partial_json(json!({
            "model": "gpt-4o-mini",
            "temperature": 0.0,
            "messages": [{ "role": "system" }, { "role": "user", "content": "innit" }]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion("Slang")))
        .expect(1)
        .mount(&server)
        .await;

    let label = classifier(&server).classify("innit").await.unwrap();

    assert_eq!(label, Label::new("slang"));
}

#[tokio::test]
async fn task_classifier_sends_task_prompt() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_partial_json(json!({
            "messages": [
                { "role": "system", "content": "Tag the part of speech." },
                { "role": "user", "content": "swiftly" }
            ]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion("Adverb")))
        .expect(1)
        .mount(&server)
        .await;
    let task = TaskSpec {
        labels: vec!["noun".into(), "verb".into(), "adverb".into()],
        instructions: Some("Tag the part of speech.".into()),
        fallback_label: None,
    };

    let tagger = classifier(&server).for_task(Some(&task)).unwrap();
    let label = tagger.classify("swiftly").await.unwrap();

    assert_eq!(label, Label::new("adverb"));
}

#[tokio::test]
async fn rate_limit_maps_to_rate_limited() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(429).set_body_json(json!({
            "error": { "message": "Rate limit exceeded", "type": "rate_limit_error" }
        })))
        .mount(&server)
        .await;

    let err = classifier(&server).classify("word").await.unwrap_err();

    assert!(matches!(err, ClassifyError::RateLimited));
}

#[tokio::test]
async fn server_error_keeps_status() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(500).set_body_string("upstream exploded"))
        .mount(&server)
        .await;

    let err = classifier(&server).classify("word").await.unwrap_err();

    match err {
        ClassifyError::Status { status, body } => {
            assert_eq!(status, 500);
            assert_eq!(body, "upstream exploded");
        }
        other => panic!("expected status error, got {other:?}"),
    }
}

#[tokio::test]
async fn empty_choices_are_malformed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "choices": [] })))
        .mount(&server)
        .await;

    let err = classifier(&server).classify("word").await.unwrap_err();

    assert!(matches!(err, ClassifyError::Malformed(_)));
}

#[tokio::test]
async fn non_json_body_is_malformed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>gateway</html>"))
        .mount(&server)
        .await;

    let err = classifier(&server).classify("word").await.unwrap_err();

    assert!(matches!(err, ClassifyError::Malformed(_)));
}

#[tokio::test]
async fn retry_wrapper_recovers_from_rate_limit() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(429))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion("formal")))
        .mount(&server)
        .await;

    let wrapper = RetryingClassifier::new(
        classifier(&server),
        RetryConfig {
            backoff_unit: Duration::from_millis(1),
            ..Default::default()
        },
        Arc::new(TracingSink),
    );

    let result = wrapper.classify_entry(&Entry::new("e1", "sir")).await;

    assert_eq!(result, ClassificationResult::Classified(Label::new("formal")));
    assert_eq!(server.received_requests().await.unwrap().len(), 3);
}
