//! Request/response payloads exchanged over HTTP.
//!
//! Generation requests are forwarded as opaque JSON objects, so only the
//! response side and the control surface are typed here.

use serde::{Deserialize, Serialize};

/// Content type of line-delimited JSON streams.
pub const NDJSON_CONTENT_TYPE: &str = "application/x-ndjson";

/// Single-shot generation result.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerateResponse {
    /// Generated text. Backends omitting the field are read as empty.
    #[serde(default)]
    pub response: String,
}

impl GenerateResponse {
    pub fn new(response: impl Into<String>) -> Self {
        Self {
            response: response.into(),
        }
    }
}

/// One backend as reported by `GET /servers`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerInfo {
    pub name: String,
    /// `host:port`
    pub address: String,
    pub current_load: usize,
    pub active: bool,
}

/// Answer to `POST /servers/{name}/activate` and `/deactivate`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToggleResponse {
    pub ok: bool,
    pub server: String,
}

impl ToggleResponse {
    pub fn ok(server: impl Into<String>) -> Self {
        Self {
            ok: true,
            server: server.into(),
        }
    }
}

/// Error envelope returned by the gateway and the backend proxy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetail {
    #[serde(rename = "type")]
    pub error_type: String,
    pub message: String,
}

impl ErrorBody {
    pub fn new(error_type: &str, message: impl Into<String>) -> Self {
        Self {
            error: ErrorDetail {
                error_type: error_type.to_string(),
                message: message.into(),
            },
        }
    }
}
