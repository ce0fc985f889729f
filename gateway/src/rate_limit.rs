//! Per-client request rate limiting.

use std::net::SocketAddr;
use std::num::NonZeroU32;
use std::sync::Arc;

use axum::{
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter};

use crate::error::GatewayError;
use crate::routes::client_id;
use crate::AppState;

/// Token bucket per client id.
pub struct ClientRateLimiter {
    limiter: DefaultKeyedRateLimiter<String>,
}

impl ClientRateLimiter {
    /// `None` when `per_minute` is 0, meaning no limit.
    pub fn per_minute(per_minute: u32) -> Option<Self> {
        NonZeroU32::new(per_minute).map(|n| Self {
            limiter: RateLimiter::keyed(Quota::per_minute(n)),
        })
    }

    pub fn check(&self, client: &str) -> Result<(), GatewayError> {
        self.limiter
            .check_key(&client.to_string())
            .map_err(|_| GatewayError::RateLimited)
    }
}

/// Middleware rejecting clients over their quota with 429.
pub async fn rate_limit(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    if let Some(limiter) = &state.rate_limiter {
        let peer = request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);
        let client = client_id(request.headers(), peer);

        if let Err(e) = limiter.check(&client) {
            tracing::warn!("Rate limit exceeded for client {}", client);
            return e.into_response();
        }
    }

    next.run(request).await
}
