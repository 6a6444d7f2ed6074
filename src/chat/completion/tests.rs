use super::*;
use serde_json::json;
use std::time::Instant;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn prompt() -> PromptBundle {
    PromptBundle {
        system: "guide".to_string(),
        user: "\nguide\n###\ncats\n###\nQuestion: cats?\nAnswer:".to_string(),
    }
}

fn client_for(server: &MockServer) -> OpenAiChatClient {
    let config = OpenAiConfig {
        base_url: format!("{}/v1", server.uri()),
        timeout_seconds: 5,
        ..OpenAiConfig::default()
    };
    OpenAiChatClient::new(&config, "sk-test")
}

fn sse_body(deltas: &[&str]) -> String {
    let mut body = String::from(": keep-alive\n\n");
    body.push_str(
        "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"},\"index\":0}]}\n\n",
    );
    for delta in deltas {
        let chunk = json!({ "choices": [{ "delta": { "content": delta }, "index": 0 }] });
        body.push_str(&format!("data: {}\n\n", chunk));
    }
    body.push_str("data: {\"choices\":[{\"delta\":{},\"index\":0}]}\n\n");
    body.push_str("data: [DONE]\n\n");
    body
}

#[test]
fn sse_lines() {
    assert_eq!(parse_sse_line("").expect("blank line"), SseEvent::Skip);
    assert_eq!(parse_sse_line(": ping").expect("comment"), SseEvent::Skip);
    assert_eq!(parse_sse_line("data: [DONE]").expect("done"), SseEvent::Done);
    assert_eq!(
        parse_sse_line(r#"data: {"choices":[{"delta":{"content":"Hi"}}]}"#).expect("delta"),
        SseEvent::Delta("Hi".to_string())
    );
    assert_eq!(
        parse_sse_line(r#"data: {"choices":[{"delta":{"role":"assistant"}}]}"#)
            .expect("role only"),
        SseEvent::Skip
    );
    assert_eq!(
        parse_sse_line(r#"data: {"choices":[{"delta":{}}]}"#).expect("empty delta"),
        SseEvent::Done
    );
    assert!(matches!(
        parse_sse_line("data: {not json"),
        Err(CompletionError::Parse(_))
    ));
}

#[test]
fn rejected_maps_to_upstream_rejected() {
    let error: ChatBotError = CompletionError::Rejected { status: 400 }.into();
    assert_eq!(error.code(), "upstream_rejected");

    let error: ChatBotError = CompletionError::Timeout.into();
    assert_eq!(error.code(), "upstream_error");
}

#[test]
fn status_codes_are_classified() {
    assert!(matches!(
        CompletionError::from(ureq::Error::StatusCode(400)),
        CompletionError::Rejected { status: 400 }
    ));
    assert!(matches!(
        CompletionError::from(ureq::Error::StatusCode(429)),
        CompletionError::Unavailable(_)
    ));
    assert!(matches!(
        CompletionError::from(ureq::Error::StatusCode(502)),
        CompletionError::Unavailable(_)
    ));
}

#[tokio::test(flavor = "multi_thread")]
async fn complete_returns_reply() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("Authorization", "Bearer sk-test"))
        .and(body_partial_json(json!({ "model": "gpt-3.5-turbo" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{ "message": { "role": "assistant", "content": "Cats are great." } }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let reply = client_for(&server)
        .complete(&prompt())
        .await
        .expect("completion should succeed");
    assert_eq!(reply, "Cats are great.");
}

#[tokio::test(flavor = "multi_thread")]
async fn invalid_request_is_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": { "message": "maximum context length exceeded" }
        })))
        .mount(&server)
        .await;

    let result = client_for(&server).complete(&prompt()).await;
    assert!(matches!(result, Err(CompletionError::Rejected { status: 400 })));
}

#[tokio::test(flavor = "multi_thread")]
async fn server_error_is_unavailable() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let result = client_for(&server).stream(&prompt()).await;
    assert!(matches!(result, Err(CompletionError::Unavailable(_))));
}

#[tokio::test(flavor = "multi_thread")]
async fn stream_yields_deltas_in_order() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_partial_json(json!({ "stream": true })))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(
                sse_body(&["Cats", " are", " great.\n", "Really."]),
                "text/event-stream",
            ),
        )
        .mount(&server)
        .await;

    let mut rx = client_for(&server)
        .stream(&prompt())
        .await
        .expect("stream should start");

    let mut deltas = Vec::new();
    while let Some(delta) = rx.recv().await {
        deltas.push(delta.expect("delta should parse"));
    }
    assert_eq!(deltas, ["Cats", " are", " great.\n", "Really."]);
}

#[tokio::test(flavor = "multi_thread")]
async fn stream_rejection_is_reported_up_front() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(400))
        .mount(&server)
        .await;

    let result = client_for(&server).stream(&prompt()).await;
    assert!(matches!(result, Err(CompletionError::Rejected { status: 400 })));
}

#[test]
fn batcher_waits_for_line_end_and_interval() {
    let start = Instant::now();
    let mut batcher = FragmentBatcher::new(start);

    assert_eq!(batcher.push("Hello", start + Duration::from_secs(5)), None);
    // Line ended, but too soon after the start.
    assert_eq!(batcher.push(" world\n", start + Duration::from_secs(2)), None);
    assert_eq!(
        batcher.push(" again\n", start + Duration::from_secs(4)),
        Some("Hello world\n again".to_string())
    );

    // The interval restarts at the flush.
    assert_eq!(batcher.push("next\n", start + Duration::from_secs(6)), None);
    assert_eq!(batcher.push("tail", start + Duration::from_secs(20)), None);
    assert_eq!(batcher.finish(), Some("next\ntail".to_string()));
}

#[test]
fn batcher_skips_blank_fragments() {
    let start = Instant::now();
    let mut batcher = FragmentBatcher::new(start);

    assert_eq!(batcher.push("  \n", start + Duration::from_secs(4)), None);
    assert_eq!(batcher.finish(), None);
}

#[test]
fn batcher_releases_everything_at_the_end() {
    let start = Instant::now();
    let mut batcher = FragmentBatcher::with_interval(start, Duration::from_secs(60));
    for delta in ["a\n", "b\n", "c"] {
        assert_eq!(batcher.push(delta, start + Duration::from_secs(1)), None);
    }
    assert_eq!(batcher.finish(), Some("a\nb\nc".to_string()));
}
