//! Health check endpoint.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::Router;

use crate::error::Result;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/healthz", get(healthz))
}

/// GET /healthz - "ok" while Ollama answers, 503 otherwise.
async fn healthz(State(state): State<Arc<AppState>>) -> Result<&'static str> {
    state.ollama.health().await?;
    Ok("ok")
}
