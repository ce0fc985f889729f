//! Inference Gateway Common Types
//!
//! Wire types shared by the gateway and the backends it fronts.

pub mod health;
pub mod protocol;

pub use health::{is_healthy_response, HEALTHY_BODIES};
pub use protocol::{
    ErrorBody, ErrorDetail, GenerateResponse, ServerInfo, ToggleResponse, NDJSON_CONTENT_TYPE,
};
