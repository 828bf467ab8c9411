//! Chat-completions discovery client against a wiremock provider.

use std::time::Duration;

use harvester_core::{ChatSearchClient, DiscoveryClient, DiscoveryError};
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

mod support;
use support::socket_guard::start_mock_server_or_skip;

fn chat_response(content: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "id": "chatcmpl-1",
        "choices": [{"index": 0, "message": {"role": "assistant", "content": content}}],
        "usage": {"prompt_tokens": 12, "completion_tokens": 30, "total_tokens": 42}
    }))
}

fn client(server: &MockServer, api_key: &str) -> ChatSearchClient {
    ChatSearchClient::new(
        format!("{}/v1/chat/completions", server.uri()),
        api_key,
        "test-model",
        Duration::from_secs(5),
    )
    .expect("client builds")
}

#[tokio::test]
async fn test_search_sends_prompt_and_parses_fenced_array() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", "Bearer sk-test"))
        .and(body_partial_json(json!({
            "model": "test-model",
            "messages": [{"role": "user", "content": "solar news in Malaysia"}]
        })))
        .respond_with(chat_response(
            "```json\n[\"https://a.com/1\", \"https://b.com/2\"]\n```",
        ))
        .expect(1)
        .mount(&server)
        .await;

    let urls = client(&server, "sk-test")
        .search("solar news in Malaysia")
        .await
        .unwrap();

    assert_eq!(urls, vec!["https://a.com/1", "https://b.com/2"]);
}

#[tokio::test]
async fn test_search_empty_array_is_success() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("POST"))
        .respond_with(chat_response("[]"))
        .mount(&server)
        .await;

    let urls = client(&server, "").search("nothing").await.unwrap();

    assert!(urls.is_empty());
}

#[tokio::test]
async fn test_search_without_key_sends_no_authorization() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("POST"))
        .respond_with(chat_response("[\"https://a.com\"]"))
        .mount(&server)
        .await;

    client(&server, "").search("p").await.unwrap();

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    assert!(!requests[0].headers.contains_key("authorization"));
}

#[tokio::test]
async fn test_search_error_status_is_failure() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429).set_body_string("rate limited"))
        .mount(&server)
        .await;

    let err = client(&server, "k").search("p").await.unwrap_err();

    assert!(matches!(
        err,
        DiscoveryError::Status { status: 429, ref body } if body == "rate limited"
    ));
}

#[tokio::test]
async fn test_search_non_array_content_is_unexpected_format() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("POST"))
        .respond_with(chat_response("{\"urls\": [\"https://a.com\"]}"))
        .mount(&server)
        .await;

    let err = client(&server, "k").search("p").await.unwrap_err();

    assert!(matches!(err, DiscoveryError::UnexpectedFormat(_)));
}

#[tokio::test]
async fn test_search_missing_choices_is_unexpected_format() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"choices": []})))
        .mount(&server)
        .await;

    let err = client(&server, "k").search("p").await.unwrap_err();

    assert!(matches!(err, DiscoveryError::UnexpectedFormat(_)));
}

#[tokio::test]
async fn test_search_unreachable_provider_is_request_error() {
    let client = ChatSearchClient::new(
        "http://127.0.0.1:9/v1/chat/completions",
        "",
        "m",
        Duration::from_secs(2),
    )
    .unwrap();

    let err = client.search("p").await.unwrap_err();

    assert!(matches!(err, DiscoveryError::Request(_)));
}
