use std::sync::Arc;

use chrono::Utc;
use parley_core::config::ServerConfig;
use parley_core::types::{ConversationId, CorrelationId, InsightAnswer, InsightResponse};
use parley_transport::{
    AssistantApi, EmploymentSubmission, HttpTransport, InsightSubmission, ProgressEvent,
    TokenStore, TransportError, WireInsightResponse,
};
use serde_json::json;
use wiremock::matchers::{body_json, body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn transport(server: &MockServer, access: Option<&str>, refresh: Option<&str>) -> HttpTransport {
    let config = ServerConfig {
        base_url: server.uri(),
        ..ServerConfig::default()
    };
    let tokens = Arc::new(TokenStore::new(
        access.map(str::to_string),
        refresh.map(str::to_string),
    ));
    HttpTransport::new(&config, tokens).expect("transport")
}

// ============================================================================
// Messages
// ============================================================================

#[tokio::test]
async fn test_send_message_posts_prompt_and_request_id() {
    let server = MockServer::start().await;
    let request_id = CorrelationId::new();
    Mock::given(method("POST"))
        .and(path("/messages/c1"))
        .and(header("authorization", "Bearer a1"))
        .and(body_json(json!({
            "prompt": "hello",
            "request_id": request_id.to_string()
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "m2",
            "role": "assistant",
            "content": "Hi"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let api = transport(&server, Some("a1"), None);
    let record = api
        .send_message(&ConversationId::new("c1"), "hello", request_id)
        .await
        .expect("send ok");
    assert_eq!(record.id.as_deref(), Some("m2"));
    assert_eq!(record.content.as_deref(), Some("Hi"));
}

#[tokio::test]
async fn test_list_messages_decodes_records() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/messages/c1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"id": "m1", "role": "user", "content": "hello"},
            {"id": "m2", "role": "assistant", "content_md": "**Hi**", "sources": []}
        ])))
        .mount(&server)
        .await;

    let api = transport(&server, Some("a1"), None);
    let records = api
        .list_messages(&ConversationId::new("c1"))
        .await
        .expect("list ok");
    assert_eq!(records.len(), 2);
    assert_eq!(records[1].content_md.as_deref(), Some("**Hi**"));
}

#[tokio::test]
async fn test_server_error_is_reported_with_status() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/messages/c1"))
        .respond_with(ResponseTemplate::new(502).set_body_string("upstream down"))
        .mount(&server)
        .await;

    let api = transport(&server, Some("a1"), None);
    let err = api
        .send_message(&ConversationId::new("c1"), "hello", CorrelationId::new())
        .await
        .unwrap_err();
    assert_eq!(
        err,
        TransportError::Http {
            status: 502,
            body: "upstream down".into()
        }
    );
}

// ============================================================================
// Authentication
// ============================================================================

#[tokio::test]
async fn test_expired_token_is_refreshed_once_and_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/chats"))
        .and(header("authorization", "Bearer stale"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .and(body_json(json!({"refresh_token": "r1"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "fresh"
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/chats"))
        .and(header("authorization", "Bearer fresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"id": "c1", "title": "First chat", "archived": false}
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let api = transport(&server, Some("stale"), Some("r1"));
    let chats = api.list_conversations().await.expect("list ok");
    assert_eq!(chats.len(), 1);
    assert_eq!(chats[0].title, "First chat");
    assert_eq!(api.tokens().access_token().as_deref(), Some("fresh"));
    assert_eq!(api.tokens().refresh_token().as_deref(), Some("r1"));
}

#[tokio::test]
async fn test_missing_refresh_token_signs_out() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/chats"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;

    let api = transport(&server, Some("stale"), None);
    let err = api.list_conversations().await.unwrap_err();
    assert!(err.is_auth_expired());
    assert!(!api.tokens().is_authenticated());
}

#[tokio::test]
async fn test_second_unauthorized_clears_tokens() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/chats"))
        .respond_with(ResponseTemplate::new(401))
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "still-bad",
            "refresh_token": "r2"
        })))
        .mount(&server)
        .await;

    let api = transport(&server, Some("stale"), Some("r1"));
    let err = api.list_conversations().await.unwrap_err();
    assert_eq!(err, TransportError::AuthExpired);
    assert!(api.tokens().access_token().is_none());
    assert!(api.tokens().refresh_token().is_none());
}

#[tokio::test]
async fn test_rejected_refresh_signs_out() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/chats"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(ResponseTemplate::new(403))
        .expect(1)
        .mount(&server)
        .await;

    let api = transport(&server, Some("stale"), Some("r1"));
    let err = api.list_conversations().await.unwrap_err();
    assert!(err.is_auth_expired());
    assert!(!api.tokens().is_authenticated());
}

// ============================================================================
// Progress stream
// ============================================================================

#[tokio::test]
async fn test_progress_events_are_decoded_in_order() {
    let server = MockServer::start().await;
    let request_id = CorrelationId::new();
    let body = concat!(
        "event: open\ndata: {}\n\n",
        ": connected\n\n",
        "data: {\"type\":\"step\",\"label\":\"Searching documents\"}\n\n",
        "data: {\"type\":\"mystery\"}\n\n",
        "data: {\"type\":\"step\"}\n\n",
        "data: {\"type\":\"done\"}\n\n",
    );
    Mock::given(method("GET"))
        .and(path("/messages/c1/progress"))
        .and(query_param("request_id", request_id.to_string()))
        .and(query_param("access_token", "a1"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .mount(&server)
        .await;

    let api = transport(&server, Some("a1"), None);
    let mut stream = api
        .open_progress(&ConversationId::new("c1"), request_id)
        .await
        .expect("stream opens");

    let mut events = Vec::new();
    while let Some(event) = stream.next_event().await {
        events.push(event.expect("well-formed event"));
    }
    assert_eq!(
        events,
        vec![
            ProgressEvent::Step {
                label: Some("Searching documents".into())
            },
            ProgressEvent::Unknown,
            ProgressEvent::Step { label: None },
            ProgressEvent::Done,
        ]
    );
    assert!(stream.is_closed());
}

#[tokio::test]
async fn test_malformed_progress_frame_surfaces_as_error_item() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/messages/c1/progress"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            "data: {oops\n\ndata: {\"type\":\"done\"}\n\n",
            "text/event-stream",
        ))
        .mount(&server)
        .await;

    let api = transport(&server, Some("a1"), None);
    let mut stream = api
        .open_progress(&ConversationId::new("c1"), CorrelationId::new())
        .await
        .expect("stream opens");

    assert!(matches!(
        stream.next_event().await,
        Some(Err(TransportError::MalformedEvent(_)))
    ));
    assert_eq!(stream.next_event().await, Some(Ok(ProgressEvent::Done)));
}

#[tokio::test]
async fn test_progress_open_failure_is_stream_open() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/messages/c1/progress"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let api = transport(&server, Some("a1"), None);
    let err = api
        .open_progress(&ConversationId::new("c1"), CorrelationId::new())
        .await
        .unwrap_err();
    assert!(matches!(err, TransportError::StreamOpen(_)));
}

// ============================================================================
// Surveys and conversations
// ============================================================================

#[tokio::test]
async fn test_insight_submission_uses_wire_names() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/insights/submit"))
        .and(body_partial_json(json!({
            "chatId": "c1",
            "msgId": "m9",
            "batchId": "b1",
            "responses": [
                {"insightId": "i1", "answerId": "a"},
                {"insightId": "i2", "answerIds": ["x", "y"]}
            ]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "submission": {
                "responses": [{"insightId": "i1", "answerId": "a"}],
                "submittedAt": "2024-05-01T10:00:00Z"
            }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let responses = [
        InsightResponse {
            insight_id: "i1".into(),
            answer: InsightAnswer::One("a".into()),
        },
        InsightResponse {
            insight_id: "i2".into(),
            answer: InsightAnswer::Many(vec!["x".into(), "y".into()]),
        },
    ];
    let body = InsightSubmission {
        chat_id: "c1".into(),
        msg_id: Some("m9".into()),
        batch_id: "b1".into(),
        responses: responses.iter().map(WireInsightResponse::from).collect(),
        submitted_at: Utc::now(),
    };

    let api = transport(&server, Some("a1"), None);
    let receipt = api.submit_insights(&body).await.expect("submit ok");
    let confirmed = receipt.submission.expect("snapshot").into_confirmed();
    assert_eq!(confirmed.responses.len(), 1);
    assert!(confirmed.submitted_at.is_some());
}

#[tokio::test]
async fn test_employment_submission_tolerates_empty_reply() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/uia/submit/employment"))
        .and(body_json(json!({
            "chat_id": "c1",
            "employment_category_id": "A",
            "vault_version": "v1"
        })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let api = transport(&server, Some("a1"), None);
    let reply = api
        .submit_employment(&EmploymentSubmission {
            chat_id: "c1".into(),
            employment_category_id: "A".into(),
            vault_version: Some("v1".into()),
        })
        .await
        .expect("submit ok");
    assert!(reply.is_null());
}

#[tokio::test]
async fn test_create_and_delete_conversation() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chats"))
        .and(body_json(json!({"title": "hello"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "c7",
            "title": "hello",
            "archived": false,
            "created_at": "2024-05-01T10:00:00Z"
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/chats/c7"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let api = transport(&server, Some("a1"), None);
    let created = api.create_conversation("hello").await.expect("create ok");
    assert_eq!(created.id, ConversationId::new("c7"));
    api.delete_conversation(&created.id)
        .await
        .expect("delete ok");
}
