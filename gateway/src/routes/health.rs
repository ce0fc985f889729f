use std::sync::Arc;

use axum::{extract::State, middleware, routing::get, Router};
use futures_util::future::select_ok;

use crate::error::{GatewayError, Result};
use crate::rate_limit::rate_limit;
use crate::AppState;

/// GET /healthz - "ok" while at least one active backend answers its probe
///
/// Active backends are probed concurrently and the first healthy answer wins,
/// so a hung backend costs at most one probe timeout. The registry is not
/// modified; that is the prober's job.
async fn healthz(State(state): State<Arc<AppState>>) -> Result<&'static str> {
    let client = state.router.client();

    let probes: Vec<_> = state
        .registry
        .active_targets()
        .into_iter()
        .map(|target| {
            Box::pin(async move {
                let result = client.probe(&target.base_url).await;
                if result.healthy {
                    Ok(target.name)
                } else {
                    tracing::debug!("Health check via {} failed: {}", target.name, result.detail);
                    Err(result.detail)
                }
            })
        })
        .collect();

    // select_ok panics on an empty set.
    if probes.is_empty() {
        return Err(GatewayError::NoBackendAvailable);
    }

    match select_ok(probes).await {
        Ok((name, _pending)) => {
            tracing::debug!("Health check answered by {}", name);
            Ok("ok")
        }
        Err(_) => Err(GatewayError::NoBackendAvailable),
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .layer(middleware::from_fn_with_state(state.clone(), rate_limit))
        .with_state(state)
}
