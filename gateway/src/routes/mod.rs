pub mod generate;
pub mod health;
pub mod servers;

use std::net::SocketAddr;

use axum::http::HeaderMap;

/// Identify the caller for logging and rate limiting.
///
/// Uses the first `X-Forwarded-For` entry when present, else the peer address.
pub fn client_id(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());

    match (forwarded, peer) {
        (Some(client), _) => client.to_string(),
        (None, Some(addr)) => addr.ip().to_string(),
        (None, None) => "unknown".to_string(),
    }
}
