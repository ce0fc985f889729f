//! Error types for the backend proxy.

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use gateway_common::ErrorBody;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Ollama answered with a non-2xx status. Forwarded as is.
    #[error("Ollama returned HTTP {status}")]
    Upstream {
        status: u16,
        content_type: Option<String>,
        body: String,
    },

    #[error("Ollama communication error: {0}")]
    Communication(String),

    #[error("Ollama unavailable: {0}")]
    Unavailable(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, error_type) = match &self {
            Error::Upstream {
                status,
                content_type,
                body,
            } => {
                let status = StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY);
                let content_type = content_type
                    .clone()
                    .unwrap_or_else(|| "text/plain; charset=utf-8".to_string());
                return (status, [(header::CONTENT_TYPE, content_type)], body.clone())
                    .into_response();
            }
            Error::Communication(_) => (StatusCode::BAD_GATEWAY, "communication_error"),
            Error::Unavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, "unavailable"),
            Error::InvalidRequest(_) => (StatusCode::BAD_REQUEST, "invalid_request"),
        };

        (status, Json(ErrorBody::new(error_type, self.to_string()))).into_response()
    }
}

pub type Result<T> = std::result::Result<T, Error>;
