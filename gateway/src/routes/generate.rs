//! Generation endpoints: `POST /generate` and `POST /stream`.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{rejection::JsonRejection, ConnectInfo, State},
    http::{header, HeaderMap, HeaderName, HeaderValue},
    middleware,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use futures_util::{stream, StreamExt};
use gateway_common::NDJSON_CONTENT_TYPE;
use serde_json::Value;

use super::client_id;
use crate::access_log::AccessRecord;
use crate::balancer::router::{ensure_object, prompt_of};
use crate::error::{GatewayError, Result};
use crate::logging::BACKEND_HEADER;
use crate::rate_limit::rate_limit;
use crate::AppState;

/// POST /generate - single-shot generation on the least loaded backend
async fn generate(
    State(state): State<Arc<AppState>>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    payload: std::result::Result<Json<Value>, JsonRejection>,
) -> Result<Response> {
    let payload = json_object(payload)?;
    let client = client_id(&headers, peer.map(|ConnectInfo(addr)| addr));
    let prompt = prompt_of(&payload);

    let result = state.router.generate(payload).await;

    let backend = match &result {
        Ok(routed) => Some(routed.backend.as_str()),
        Err(e) => e.handled_by(),
    };
    state
        .access_log
        .record(AccessRecord::new(client, backend, prompt));

    let routed = result?;
    let mut response = Json(routed.response).into_response();
    set_backend_header(&mut response, &routed.backend);
    Ok(response)
}

/// POST /stream - newline-delimited JSON relayed line by line
///
/// The first line is awaited before the response is committed, so failures
/// that happen before any output still map to a proper status code.
async fn stream_generate(
    State(state): State<Arc<AppState>>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    payload: std::result::Result<Json<Value>, JsonRejection>,
) -> Result<Response> {
    let payload = json_object(payload)?;
    let client = client_id(&headers, peer.map(|ConnectInfo(addr)| addr));
    let prompt = prompt_of(&payload);

    let mut relay = state.router.stream(payload);
    let first = relay.next_line().await;

    let backend = match &first {
        Some(Err(e)) => e.handled_by(),
        _ => relay.backend(),
    };
    state
        .access_log
        .record(AccessRecord::new(client, backend, prompt));

    let first = first.transpose()?;
    let backend = relay.backend().unwrap_or_default().to_string();

    let lines = stream::iter(first.map(Ok::<_, GatewayError>)).chain(relay.into_stream());
    let mut response = Body::from_stream(lines).into_response();
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(NDJSON_CONTENT_TYPE),
    );
    set_backend_header(&mut response, &backend);
    Ok(response)
}

/// Unwrap a JSON body, reporting extractor failures in the gateway's error format.
fn json_object(payload: std::result::Result<Json<Value>, JsonRejection>) -> Result<Value> {
    let Json(payload) = payload.map_err(|e| GatewayError::InvalidRequest(e.body_text()))?;
    ensure_object(&payload)?;
    Ok(payload)
}

fn set_backend_header(response: &mut Response, backend: &str) {
    if let Ok(value) = HeaderValue::from_str(backend) {
        response
            .headers_mut()
            .insert(HeaderName::from_static(BACKEND_HEADER), value);
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/generate", post(generate))
        .route("/stream", post(stream_generate))
        .layer(middleware::from_fn_with_state(state.clone(), rate_limit))
        .with_state(state)
}
