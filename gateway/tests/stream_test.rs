use std::sync::Arc;
use std::time::Duration;

use axum::body::{to_bytes, Body};
use bytes::Bytes;
use futures_util::StreamExt;
use http::{Request, StatusCode};
use inference_gateway::config::BackendConfig;
use inference_gateway::test_util::{
    backend_from_uri, create_test_state, ndjson, refused_backend, Script, ScriptedBackend,
};
use inference_gateway::{build_app, AppState};
use rstest::rstest;
use serde_json::{json, Value};
use tower::ServiceExt;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn stream_request(payload: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/stream")
        .header("content-type", "application/json")
        .body(Body::from(payload.to_string()))
        .unwrap()
}

async fn open(state: &Arc<AppState>) -> axum::response::Response {
    build_app(state.clone())
        .oneshot(stream_request(json!({"prompt": "count to three"})))
        .await
        .unwrap()
}

/// Read a body until it ends or fails. Returns the data and whether it failed.
async fn drain(body: Body) -> (String, bool) {
    let mut data = Vec::new();
    let mut chunks = body.into_data_stream();
    while let Some(chunk) = chunks.next().await {
        match chunk {
            Ok(bytes) => data.extend_from_slice(&bytes),
            Err(_) => return (String::from_utf8(data).unwrap(), true),
        }
    }
    (String::from_utf8(data).unwrap(), false)
}

#[tokio::test]
async fn test_stream_relays_lines() {
    let backend = ScriptedBackend::start(Script::Complete(ndjson(&[
        r#"{"response":"one","done":false}"#,
        r#"{"response":"two","done":true}"#,
    ])))
    .await;
    let state = create_test_state(vec![backend.config("a")]);

    let response = open(&state).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["content-type"], "application/x-ndjson");
    assert_eq!(response.headers()["x-backend"], "a");
    // The first line is already read; the slot is held until the body ends.
    assert_eq!(state.registry.total_load(), 1);

    let (body, failed) = drain(response.into_body()).await;
    assert!(!failed);
    assert_eq!(
        body,
        "{\"response\":\"one\",\"done\":false}\n{\"response\":\"two\",\"done\":true}\n"
    );
    assert_eq!(state.registry.total_load(), 0);
}

#[tokio::test]
async fn test_stream_defaults_stream_flag_to_true() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/stream"))
        .and(body_partial_json(json!({"stream": true})))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "application/x-ndjson")
                .set_body_string("{\"response\":\"hi\"}\n\n{\"done\":true}"),
        )
        .expect(1)
        .mount(&server)
        .await;
    let state = create_test_state(vec![backend_from_uri("a", &server.uri())]);

    let response = open(&state).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();

    // Blank line dropped, unterminated tail forwarded with a newline.
    assert_eq!(body, Bytes::from("{\"response\":\"hi\"}\n{\"done\":true}\n"));
}

#[rstest]
#[case::refused(None)]
#[case::drop_before_headers(Some(Script::DropBeforeHeaders))]
#[case::drop_after_headers(Some(Script::DropAfter(Vec::new())))]
#[case::drop_mid_line(Some(Script::DropAfter(vec!["{\"response\":\"par".to_string()])))]
#[tokio::test]
async fn test_failure_before_first_line_fails_over(#[case] failing: Option<Script>) {
    let broken = match &failing {
        Some(script) => Some(ScriptedBackend::start(script.clone()).await),
        None => None,
    };
    let first: BackendConfig = match &broken {
        Some(backend) => backend.config("a"),
        None => refused_backend("a").await,
    };
    let healthy = ScriptedBackend::start(Script::Complete(ndjson(&["{\"response\":\"ok\"}"]))).await;
    let state = create_test_state(vec![first, healthy.config("b")]);

    let response = open(&state).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["x-backend"], "b");

    let (body, failed) = drain(response.into_body()).await;
    assert!(!failed);
    assert_eq!(body, "{\"response\":\"ok\"}\n");

    assert!(!state.registry.get("a").unwrap().active);
    assert!(state.registry.get("b").unwrap().active);
    if let Some(broken) = &broken {
        assert_eq!(broken.requests(), 1);
    }
    assert_eq!(healthy.requests(), 1);
    assert_eq!(state.registry.total_load(), 0);
}

#[tokio::test]
async fn test_failure_after_first_line_terminates_without_retry() {
    let broken = ScriptedBackend::start(Script::DropAfter(ndjson(&[
        r#"{"response":"one"}"#,
        r#"{"response":"two"}"#,
    ])))
    .await;
    let spare = ScriptedBackend::start(Script::Complete(ndjson(&[r#"{"response":"other"}"#]))).await;
    let state = create_test_state(vec![broken.config("a"), spare.config("b")]);

    let response = open(&state).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["x-backend"], "a");

    let (body, failed) = drain(response.into_body()).await;
    assert!(failed, "client must see an aborted body");
    assert_eq!(body, "{\"response\":\"one\"}\n{\"response\":\"two\"}\n");

    assert_eq!(spare.requests(), 0);
    assert!(!state.registry.get("a").unwrap().active);
    assert_eq!(state.registry.total_load(), 0);
}

#[tokio::test]
async fn test_single_backend_failure_is_retry_exhausted() {
    let broken = ScriptedBackend::start(Script::DropBeforeHeaders).await;
    let state = create_test_state(vec![broken.config("a")]);

    let response = open(&state).await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body["error"]["type"], "retry_exhausted");
    assert_eq!(state.registry.total_load(), 0);
}

#[tokio::test]
async fn test_application_error_on_stream_not_retried() {
    let rejecting = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/stream"))
        .respond_with(ResponseTemplate::new(503).set_body_string("model is loading"))
        .expect(1)
        .mount(&rejecting)
        .await;
    let spare = ScriptedBackend::start(Script::Complete(ndjson(&["{}"]))).await;
    let state = create_test_state(vec![backend_from_uri("a", &rejecting.uri()), spare.config("b")]);

    let response = open(&state).await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(body, Bytes::from("model is loading"));

    assert_eq!(spare.requests(), 0);
    assert!(state.registry.get("a").unwrap().active);
    assert_eq!(state.registry.total_load(), 0);
}

#[tokio::test]
async fn test_client_cancellation_releases_slot() {
    let hanging = ScriptedBackend::start(Script::Hang(ndjson(&[r#"{"response":"first"}"#]))).await;
    let state = create_test_state(vec![hanging.config("a")]);

    let response = open(&state).await;
    assert_eq!(response.status(), StatusCode::OK);

    let mut chunks = response.into_body().into_data_stream();
    let first = chunks.next().await.unwrap().unwrap();
    assert_eq!(first, Bytes::from("{\"response\":\"first\"}\n"));
    assert_eq!(state.registry.total_load(), 1);

    drop(chunks);

    assert_eq!(state.registry.total_load(), 0);
    assert!(state.registry.get("a").unwrap().active);
    assert_eq!(hanging.requests(), 1);
}

#[tokio::test]
async fn test_client_gone_before_first_line_releases_slot() {
    // Headers arrive, but no line ever does: the handler is still priming.
    let silent = ScriptedBackend::start(Script::Hang(Vec::new())).await;
    let state = create_test_state(vec![silent.config("a")]);

    let pending = {
        let state = state.clone();
        tokio::spawn(async move { open(&state).await })
    };
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(state.registry.total_load(), 1);

    pending.abort();
    assert!(pending.await.unwrap_err().is_cancelled());

    assert_eq!(state.registry.total_load(), 0);
    assert!(state.registry.get("a").unwrap().active);
    assert_eq!(silent.requests(), 1);
}

/// Run every failure shape through the gateway and check that load always
/// returns to zero once the client is done with the response.
#[tokio::test]
async fn test_load_returns_to_baseline_under_injected_failures() {
    let scripts = vec![
        Script::Complete(ndjson(&["{}", "{}"])),
        Script::DropBeforeHeaders,
        Script::DropAfter(Vec::new()),
        Script::DropAfter(ndjson(&["{}"])),
        Script::Hang(ndjson(&["{}"])),
    ];

    for first in &scripts {
        for second in &scripts {
            let a = ScriptedBackend::start(first.clone()).await;
            let b = ScriptedBackend::start(second.clone()).await;
            let state = create_test_state(vec![a.config("a"), b.config("b")]);

            let response = open(&state).await;
            if response.status() == StatusCode::OK {
                let mut chunks = response.into_body().into_data_stream();
                // Read the first chunk; drain the rest unless a backend hangs.
                let _ = chunks.next().await;
                if !matches!((first, second), (Script::Hang(_), _) | (_, Script::Hang(_))) {
                    while chunks.next().await.is_some() {}
                }
            }

            assert_eq!(
                state.registry.total_load(),
                0,
                "slot leaked with scripts {:?} / {:?}",
                first,
                second
            );
        }
    }
}
