//! Routes generation requests onto the backend pool.

use std::sync::Arc;

use gateway_common::GenerateResponse;
use serde_json::Value;

use super::client::{BackendClient, BackendError};
use super::registry::Registry;
use super::retry::Failover;
use super::stream::StreamRelay;
use crate::error::{GatewayError, Result};

/// A response together with the backend that produced it.
#[derive(Debug)]
pub struct Routed<T> {
    pub response: T,
    pub backend: String,
}

/// Least-loaded router with failover on transient backend failures.
#[derive(Debug, Clone)]
pub struct BalancedRouter {
    registry: Arc<Registry>,
    client: BackendClient,
    max_attempts: usize,
}

impl BalancedRouter {
    pub fn new(registry: Arc<Registry>, client: BackendClient, max_attempts: usize) -> Self {
        Self {
            registry,
            client,
            max_attempts,
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn client(&self) -> &BackendClient {
        &self.client
    }

    /// Single-shot generation. The payload's `stream` flag is forced to false.
    ///
    /// Transient failures eject the backend and move on to the next one;
    /// application errors come back to the caller untouched.
    pub async fn generate(&self, mut payload: Value) -> Result<Routed<GenerateResponse>> {
        set_stream_flag(&mut payload, false);
        let mut failover = Failover::new(self.max_attempts);

        loop {
            let slot = failover.next_slot(&self.registry)?;
            tracing::info!(
                "Routing generate request to {} (attempt {})",
                slot.name(),
                failover.attempts()
            );

            match self.client.generate(slot.base_url(), &payload).await {
                Ok(response) => {
                    return Ok(Routed {
                        response,
                        backend: slot.name().to_string(),
                    })
                }
                Err(BackendError::Transient(detail)) => {
                    failover.record_transient(&self.registry, &slot, &detail);
                }
                Err(BackendError::Application {
                    status,
                    content_type,
                    body,
                }) => {
                    tracing::info!("Backend {} rejected request with HTTP {}", slot.name(), status);
                    return Err(GatewayError::BackendApplication {
                        backend: slot.name().to_string(),
                        status,
                        content_type,
                        body,
                    });
                }
            }
        }
    }

    /// Streaming generation. `stream` defaults to true when the client left it out.
    pub fn stream(&self, mut payload: Value) -> StreamRelay {
        if let Some(obj) = payload.as_object_mut() {
            obj.entry("stream").or_insert(Value::Bool(true));
        }
        StreamRelay::new(
            Arc::clone(&self.registry),
            self.client.clone(),
            payload,
            Failover::new(self.max_attempts),
        )
    }
}

fn set_stream_flag(payload: &mut Value, stream: bool) {
    if let Some(obj) = payload.as_object_mut() {
        obj.insert("stream".to_string(), Value::Bool(stream));
    }
}

/// Reject payloads that are not JSON objects.
pub fn ensure_object(payload: &Value) -> Result<()> {
    if payload.is_object() {
        Ok(())
    } else {
        Err(GatewayError::InvalidRequest(
            "request body must be a JSON object".to_string(),
        ))
    }
}

/// The `prompt` field of a payload, for the access log.
pub fn prompt_of(payload: &Value) -> String {
    payload
        .get("prompt")
        .and_then(Value::as_str)
        .map(|p| p.trim().to_string())
        .unwrap_or_default()
}
