//! Admin endpoints for inspecting and toggling backends.
//!
//! Provides:
//! - `GET /servers`: every backend with its address, load and active flag
//! - `POST /servers/:name/activate`
//! - `POST /servers/:name/deactivate`
//!
//! Toggling only affects selection of new requests; in-flight requests keep
//! their slot until they finish. The next probe pass may override a toggle.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use gateway_common::{ServerInfo, ToggleResponse};

use crate::error::Result;
use crate::AppState;

async fn list_servers(State(state): State<Arc<AppState>>) -> Json<Vec<ServerInfo>> {
    Json(state.registry.snapshot())
}

async fn activate(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<ToggleResponse>> {
    state.registry.set_active(&name, true)?;
    tracing::info!("Backend {} activated by admin", name);
    Ok(Json(ToggleResponse::ok(name)))
}

async fn deactivate(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<ToggleResponse>> {
    state.registry.set_active(&name, false)?;
    tracing::info!("Backend {} deactivated by admin", name);
    Ok(Json(ToggleResponse::ok(name)))
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/servers", get(list_servers))
        .route("/servers/:name/activate", post(activate))
        .route("/servers/:name/deactivate", post(deactivate))
        .with_state(state)
}
