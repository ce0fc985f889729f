//! Backend HTTP API consumed by the gateway.

pub mod generate;
pub mod health;

use std::sync::Arc;

use axum::Router;

use crate::state::AppState;

/// Build the API router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .merge(generate::router())
        .merge(health::router())
}
