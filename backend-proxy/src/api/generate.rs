//! Generation endpoints passed through to Ollama.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, HeaderValue};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use gateway_common::{GenerateResponse, NDJSON_CONTENT_TYPE};
use serde_json::Value;

use crate::error::Result;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/generate", post(generate))
        .route("/stream", post(stream))
}

/// POST /generate - one JSON answer.
async fn generate(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<Value>,
) -> Result<Json<GenerateResponse>> {
    let response = state.ollama.generate(payload).await?;
    Ok(Json(response))
}

/// POST /stream - Ollama's NDJSON relayed as it arrives.
async fn stream(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<Value>,
) -> Result<Response> {
    let body = state.ollama.stream(payload).await?;

    let mut response = Body::from_stream(body).into_response();
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(NDJSON_CONTENT_TYPE),
    );
    Ok(response)
}
