//! Integration tests for the Telegram notifier
//!
//! Tests HTTP client behavior using wiremock for request/response mocking.

use serde_json::json;
use wiremock::{
    matchers::{body_partial_json, method, path},
    Mock, MockServer, ResponseTemplate,
};

use experiment_store::config::{NotifierConfig, RequestConfig};
use experiment_store::error::NotifierError;
use experiment_store::notify::{AlertSink, TelegramNotifier};

/// Create a test notifier pointing to the mock server
fn create_test_notifier(base_url: &str, max_retries: u32) -> TelegramNotifier {
    let config = NotifierConfig {
        bot_token: "test-token".to_string(),
        chat_id: "12345".to_string(),
        base_url: base_url.to_string(),
    };

    let request_config = RequestConfig {
        timeout_ms: 5000,
        max_retries,
        retry_delay_ms: 10, // Fast retries for testing
    };

    TelegramNotifier::new(&config, request_config).expect("Failed to create notifier")
}

#[tokio::test]
async fn test_successful_send() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/bottest-token/sendMessage"))
        .and(body_partial_json(json!({
            "chat_id": "12345",
            "text": "⚠️ test alert",
            "parse_mode": "Markdown"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "ok": true,
            "result": {"message_id": 1}
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let notifier = create_test_notifier(&mock_server.uri(), 0);
    let result = notifier.send_notification("⚠️ test alert").await;

    assert!(result.is_ok(), "send should succeed: {:?}", result.err());
}

#[tokio::test]
async fn test_api_level_failure_is_detected() {
    let mock_server = MockServer::start().await;

    // HTTP 200 but the Bot API reports failure in the body
    Mock::given(method("POST"))
        .and(path("/bottest-token/sendMessage"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "ok": false,
            "description": "Bad Request: chat not found"
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let notifier = create_test_notifier(&mock_server.uri(), 0);
    let err = notifier.send_notification("hello").await.unwrap_err();

    assert!(matches!(err, NotifierError::Unavailable { retries: 1, .. }));
    assert!(err.to_string().contains("chat not found"));
}

#[tokio::test]
async fn test_server_error_exhausts_retries() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/bottest-token/sendMessage"))
        .respond_with(ResponseTemplate::new(500).set_body_string("internal error"))
        .expect(3) // Initial attempt plus two retries
        .mount(&mock_server)
        .await;

    let notifier = create_test_notifier(&mock_server.uri(), 2);
    let err = notifier.send_notification("hello").await.unwrap_err();

    assert!(matches!(err, NotifierError::Unavailable { retries: 3, .. }));
}

#[tokio::test]
async fn test_recovers_after_transient_failure() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/bottest-token/sendMessage"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/bottest-token/sendMessage"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
        .expect(1)
        .mount(&mock_server)
        .await;

    let notifier = create_test_notifier(&mock_server.uri(), 2);
    let result = notifier.send_notification("hello").await;

    assert!(result.is_ok(), "retry should recover: {:?}", result.err());
}

#[tokio::test]
async fn test_trailing_slash_in_base_url_is_normalized() {
    let notifier = create_test_notifier("https://api.telegram.org/", 0);
    assert_eq!(notifier.base_url(), "https://api.telegram.org");
}
