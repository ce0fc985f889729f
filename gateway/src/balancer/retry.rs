//! Attempt accounting shared by the single-shot and streaming paths.

use std::sync::Arc;

use super::registry::{BackendSlot, Registry};
use crate::error::GatewayError;

/// Tracks attempts of one logical request across backends.
#[derive(Debug)]
pub struct Failover {
    max_attempts: usize,
    attempts: usize,
    last_failure: Option<String>,
}

impl Failover {
    pub fn new(max_attempts: usize) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            attempts: 0,
            last_failure: None,
        }
    }

    /// Attempts started so far.
    pub fn attempts(&self) -> usize {
        self.attempts
    }

    /// Acquire a backend for the next attempt.
    ///
    /// With no prior failure an empty pool is reported as
    /// [`GatewayError::NoBackendAvailable`]; once an attempt has failed, running
    /// out of attempts or of backends is [`GatewayError::RetryExhausted`].
    pub fn next_slot(&mut self, registry: &Arc<Registry>) -> Result<BackendSlot, GatewayError> {
        if self.attempts >= self.max_attempts {
            return Err(self.exhausted());
        }

        match registry.acquire() {
            Ok(slot) => {
                self.attempts += 1;
                Ok(slot)
            }
            Err(e) if self.last_failure.is_none() => Err(e),
            Err(_) => Err(self.exhausted()),
        }
    }

    /// Record a transient failure on `slot` and take its backend out of rotation.
    pub fn record_transient(&mut self, registry: &Registry, slot: &BackendSlot, detail: &str) {
        if registry.eject(slot.id()) {
            tracing::warn!(
                "Backend {} failed (attempt {}/{}), marked inactive: {}",
                slot.name(),
                self.attempts,
                self.max_attempts,
                detail
            );
        } else {
            tracing::debug!("Backend {} failed again: {}", slot.name(), detail);
        }
        self.last_failure = Some(format!("{}: {}", slot.name(), detail));
    }

    fn exhausted(&self) -> GatewayError {
        GatewayError::RetryExhausted {
            attempts: self.attempts,
            last_failure: self
                .last_failure
                .clone()
                .unwrap_or_else(|| "no attempt succeeded".to_string()),
        }
    }
}
