use axum::routing::post;
use axum::{Json, Router};
use ringline_types::Turn;
use ringline_voice::{GeneratorConfig, GeneratorService, Responder, VoiceError};
use serde_json::{json, Value};
use std::net::SocketAddr;

/// Starts a local OpenAI-compatible mock returning `content` for every
/// completion request. Returns the base URL.
async fn start_mock_api(content: &'static str, status: axum::http::StatusCode) -> String {
    let app = Router::new().route(
        "/v1/chat/completions",
        post(move |Json(_body): Json<Value>| async move {
            (
                status,
                Json(json!({
                    "choices": [
                        {"message": {"role": "assistant", "content": content}}
                    ]
                })),
            )
        }),
    );

    let listener = tokio::net::TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0)))
        .await
        .unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    format!("http://{}/v1", addr)
}

fn history() -> Vec<Turn> {
    vec![
        Turn::agent("Hello! Are you available to schedule an appointment?"),
        Turn::caller("Yes, I think so."),
    ]
}

#[tokio::test]
async fn respond_returns_completion_text() {
    let base_url = start_mock_api("Sure, what day works?", axum::http::StatusCode::OK).await;

    let service = GeneratorService::new(GeneratorConfig::new(
        base_url,
        Some("test-key".into()),
        "test-model",
        "You are a scheduling assistant.",
    ));

    let reply = service
        .respond(&history(), "I need to reschedule")
        .await
        .unwrap();
    assert_eq!(reply.text, "Sure, what day works?");
    assert!(!reply.should_close);
}

#[tokio::test]
async fn close_sentinel_sets_should_close() {
    let base_url = start_mock_api(
        "Perfect, see you Tuesday. Goodbye! [END_CALL]",
        axum::http::StatusCode::OK,
    )
    .await;

    let service = GeneratorService::new(GeneratorConfig::new(
        base_url,
        Some("test-key".into()),
        "test-model",
        "You are a scheduling assistant.",
    ));

    let reply = service.respond(&history(), "Tuesday works").await.unwrap();
    assert!(reply.should_close);
    assert_eq!(reply.text, "Perfect, see you Tuesday. Goodbye!");
}

#[tokio::test]
async fn api_error_is_a_generation_error() {
    let base_url = start_mock_api("ignored", axum::http::StatusCode::INTERNAL_SERVER_ERROR).await;

    let service = GeneratorService::new(GeneratorConfig::new(
        base_url,
        Some("test-key".into()),
        "test-model",
        "You are a scheduling assistant.",
    ));

    let err = service.respond(&history(), "hello").await.unwrap_err();
    assert!(matches!(err, VoiceError::Generation(_)));
}

#[tokio::test]
async fn unreachable_api_is_a_generation_error() {
    // Nothing listens on this port.
    let service = GeneratorService::new(GeneratorConfig::new(
        "http://127.0.0.1:9/v1",
        Some("test-key".into()),
        "test-model",
        "You are a scheduling assistant.",
    ));

    let err = service.respond(&history(), "hello").await.unwrap_err();
    assert!(matches!(
        err,
        VoiceError::Generation(_) | VoiceError::Timeout { .. }
    ));
}

#[tokio::test]
async fn missing_api_key_degrades_to_canned_reply() {
    let service = GeneratorService::new(GeneratorConfig::new(
        "http://127.0.0.1:9/v1",
        None,
        "test-model",
        "You are a scheduling assistant.",
    ));

    let reply = service.respond(&history(), "hello").await.unwrap();
    assert!(!reply.text.is_empty());
    assert!(!reply.should_close);
}
