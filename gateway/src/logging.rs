use std::time::Instant;

use axum::{
    extract::Request,
    http::{HeaderName, HeaderValue},
    middleware::Next,
    response::Response,
};
use tracing::Instrument;
use uuid::Uuid;

/// Correlation id attached to every response.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Name of the backend that served a routed request.
pub const BACKEND_HEADER: &str = "x-backend";

/// Middleware that logs HTTP requests at INFO level.
///
/// Each request runs inside a span carrying a fresh request id, so log lines
/// emitted while routing it (attempts, ejections) can be correlated.
pub async fn request_logger(request: Request, next: Next) -> Response {
    let start = Instant::now();
    let request_id = Uuid::new_v4().to_string();
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    let span = tracing::info_span!("request", id = %request_id, method = %method, path = %path);
    let mut response = next.run(request).instrument(span.clone()).await;

    let status = response.status();
    let duration = start.elapsed();
    let backend = response
        .headers()
        .get(BACKEND_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-")
        .to_string();

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response
            .headers_mut()
            .insert(HeaderName::from_static(REQUEST_ID_HEADER), value);
    }

    span.in_scope(|| {
        tracing::info!(
            status = %status.as_u16(),
            backend = %backend,
            duration_ms = %duration.as_millis(),
            "HTTP request"
        );
    });

    response
}
