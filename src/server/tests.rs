use axum::body::Body;
use axum::http::{Request, StatusCode};
use tower::ServiceExt;

use super::*;
use crate::config::Config;
use crate::test_support::{Script, ScriptedClient, service, service_with};

fn post_chat(message: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/chat")
        .header("content-type", "application/json")
        .body(Body::from(
            serde_json::json!({ "message": message }).to_string(),
        ))
        .unwrap()
}

async fn ask(app: Router, message: &str) -> (StatusCode, ChatResponse) {
    let resp = ServiceExt::<Request<Body>>::oneshot(app, post_chat(message))
        .await
        .unwrap();
    let status = resp.status();
    let body = axum::body::to_bytes(resp.into_body(), 100_000)
        .await
        .unwrap();
    let json: ChatResponse = serde_json::from_slice(&body).unwrap();
    (status, json)
}

fn app(script: Script) -> Router {
    router(Arc::new(service(ScriptedClient::new(script))), 1024)
}

#[tokio::test]
async fn chat_returns_the_answer() {
    let (status, body) = ask(app(Script::Answer), "are cats great?").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, ChatResponse::success("Cats are great."));
}

#[tokio::test]
async fn long_message_is_refused_in_the_body() {
    let client = ScriptedClient::new(Script::Answer);
    let app = router(Arc::new(service(client.clone())), 1024);

    let (status, body) = ask(app, &"é".repeat(1025)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, ChatResponse::error(MESSAGE_TOO_LONG_REPLY));
    assert_eq!(client.calls(), 0);
}

#[tokio::test]
async fn message_at_the_limit_is_answered() {
    let (_, body) = ask(app(Script::Answer), &"a".repeat(1024)).await;
    assert_eq!(body.status, ChatStatus::Success);
}

#[tokio::test]
async fn empty_message_is_an_error() {
    let (_, body) = ask(app(Script::Answer), "  ").await;
    assert_eq!(body.status, ChatStatus::Error);
}

#[tokio::test]
async fn rejected_upstream_is_not_available() {
    let (_, body) = ask(app(Script::Reject), "cats?").await;
    assert_eq!(body, ChatResponse::error(NOT_AVAILABLE_REPLY));
}

#[tokio::test]
async fn unreachable_upstream_carries_the_code() {
    let (_, body) = ask(app(Script::Unavailable), "cats?").await;
    assert_eq!(
        body,
        ChatResponse::error("oops! something went wrong (upstream_error)")
    );
}

#[tokio::test]
async fn oversized_prompt_still_succeeds() {
    let mut config = Config::default();
    config.retrieval.max_prompt_tokens = 10;
    let service = service_with(vec![ScriptedClient::new(Script::Answer)], &config, false);

    let (_, body) = ask(router(Arc::new(service), 1024), "cats?").await;
    assert_eq!(body, ChatResponse::success(HTTP_PROMPT_TOO_LONG_REPLY));
}

#[tokio::test]
async fn no_bot_means_no_capacity() {
    let service = service(ScriptedClient::new(Script::Answer));
    service.pool().bots()[0].set_standby(true);

    let (_, body) = ask(router(Arc::new(service), 1024), "cats?").await;
    assert_eq!(
        body,
        ChatResponse::error("oops! something went wrong (no_capacity)")
    );
}

#[tokio::test]
async fn health_reports_ok() {
    let req = Request::builder()
        .uri("/health")
        .body(Body::empty())
        .unwrap();
    let resp = ServiceExt::<Request<Body>>::oneshot(app(Script::Answer), req)
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn serve_stops_on_shutdown() {
    let config = ServerConfig {
        port: 0,
        ..ServerConfig::default()
    };
    let (tx, rx) = watch::channel(false);
    let server = tokio::spawn({
        let service = Arc::new(service(ScriptedClient::new(Script::Answer)));
        async move { serve(&config, service, rx).await }
    });

    tx.send(true).unwrap();
    server.await.unwrap().unwrap();
}
