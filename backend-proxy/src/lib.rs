//! Backend proxy - exposes `/generate`, `/stream` and `/healthz` in front of a
//! single Ollama server, so it can sit behind the inference gateway.

pub mod api;
pub mod config;
pub mod error;
pub mod ollama;
pub mod state;

use std::sync::Arc;

use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub use config::Config;
pub use state::AppState;

/// Build the HTTP application.
pub fn build_app(state: Arc<AppState>) -> Router {
    api::router()
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
