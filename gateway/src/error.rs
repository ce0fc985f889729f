//! Error types for the request path.

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use gateway_common::ErrorBody;

/// Errors surfaced to gateway clients.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("No active backend available")]
    NoBackendAvailable,

    /// The backend answered, but rejected the request. Forwarded verbatim.
    #[error("Backend '{backend}' returned HTTP {status}")]
    BackendApplication {
        backend: String,
        status: u16,
        content_type: Option<String>,
        body: String,
    },

    #[error("All {attempts} attempt(s) failed, last error: {last_failure}")]
    RetryExhausted { attempts: usize, last_failure: String },

    /// A backend failed after part of a stream reached the client.
    #[error("Stream from backend '{backend}' terminated: {detail}")]
    StreamTerminated { backend: String, detail: String },

    #[error("Unknown backend: {0}")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Rate limit exceeded")]
    RateLimited,
}

impl GatewayError {
    /// Backend that handled the request before it failed, if any.
    pub fn handled_by(&self) -> Option<&str> {
        match self {
            GatewayError::BackendApplication { backend, .. }
            | GatewayError::StreamTerminated { backend, .. } => Some(backend.as_str()),
            _ => None,
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let (status, error_type) = match &self {
            GatewayError::BackendApplication {
                status,
                content_type,
                body,
                ..
            } => {
                let status = StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY);
                let content_type = content_type
                    .clone()
                    .unwrap_or_else(|| "text/plain; charset=utf-8".to_string());
                return (status, [(header::CONTENT_TYPE, content_type)], body.clone())
                    .into_response();
            }
            GatewayError::NoBackendAvailable => {
                (StatusCode::SERVICE_UNAVAILABLE, "no_backend_available")
            }
            GatewayError::RetryExhausted { .. } => {
                (StatusCode::SERVICE_UNAVAILABLE, "retry_exhausted")
            }
            GatewayError::StreamTerminated { .. } => (StatusCode::BAD_GATEWAY, "stream_terminated"),
            GatewayError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            GatewayError::InvalidRequest(_) => (StatusCode::BAD_REQUEST, "invalid_request"),
            GatewayError::RateLimited => (StatusCode::TOO_MANY_REQUESTS, "rate_limited"),
        };

        (status, Json(ErrorBody::new(error_type, self.to_string()))).into_response()
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            GatewayError::NoBackendAvailable.into_response().status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            GatewayError::RetryExhausted {
                attempts: 2,
                last_failure: "connection refused".to_string(),
            }
            .into_response()
            .status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            GatewayError::NotFound("x".to_string()).into_response().status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            GatewayError::RateLimited.into_response().status(),
            StatusCode::TOO_MANY_REQUESTS
        );
    }

    #[test]
    fn test_application_error_keeps_backend_status() {
        let response = GatewayError::BackendApplication {
            backend: "gpu-1".to_string(),
            status: 422,
            content_type: Some("application/json".to_string()),
            body: r#"{"detail":"bad prompt"}"#.to_string(),
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "application/json"
        );
    }

    #[test]
    fn test_handled_by() {
        let rejected = GatewayError::BackendApplication {
            backend: "gpu-1".to_string(),
            status: 400,
            content_type: None,
            body: String::new(),
        };
        assert_eq!(rejected.handled_by(), Some("gpu-1"));
        assert_eq!(GatewayError::NoBackendAvailable.handled_by(), None);
        assert_eq!(
            GatewayError::RetryExhausted {
                attempts: 2,
                last_failure: "gpu-1: reset".to_string(),
            }
            .handled_by(),
            None
        );
    }

    #[test]
    fn test_retry_exhausted_carries_last_failure() {
        let err = GatewayError::RetryExhausted {
            attempts: 2,
            last_failure: "gpu-2: connection reset".to_string(),
        };
        assert!(err.to_string().contains("gpu-2: connection reset"));
    }
}
