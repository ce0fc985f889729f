//! Periodic health probing of every configured backend.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

use super::client::BackendClient;
use super::registry::Registry;

/// Result counts of one probe pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProbeSummary {
    pub active: usize,
    pub inactive: usize,
}

/// Probes every backend and writes the outcome into the registry's active flags.
///
/// Probing is the only thing that reactivates an ejected backend; it also
/// overrides earlier admin toggles on its next pass. A probe that was in
/// flight when a backend was ejected or toggled is discarded.
#[derive(Debug, Clone)]
pub struct HealthProber {
    registry: Arc<Registry>,
    client: BackendClient,
    interval: Duration,
}

impl HealthProber {
    pub fn new(registry: Arc<Registry>, client: BackendClient, interval: Duration) -> Self {
        Self {
            registry,
            client,
            interval,
        }
    }

    /// Probe all backends concurrently, each under its own timeout.
    pub async fn probe_all(&self) -> ProbeSummary {
        let targets = self.registry.targets();
        let results = join_all(targets.iter().map(|t| self.client.probe(&t.base_url))).await;

        let mut summary = ProbeSummary::default();
        for (target, result) in targets.iter().zip(results) {
            let Some(was_active) =
                self.registry
                    .set_active_if_unchanged(target.id, target.generation, result.healthy)
            else {
                tracing::debug!(
                    "Discarding probe of {}: state changed while it was in flight",
                    target.name
                );
                continue;
            };

            if result.healthy {
                summary.active += 1;
                tracing::debug!(
                    "[OK] {} ({} ms)",
                    target.name,
                    result.elapsed.as_millis()
                );
                if !was_active {
                    tracing::info!("Backend {} is healthy again, marked active", target.name);
                }
            } else {
                summary.inactive += 1;
                let status = result
                    .status
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "no response".to_string());
                tracing::warn!(
                    "[FAIL] {} ({}, {} ms): {}",
                    target.name,
                    status,
                    result.elapsed.as_millis(),
                    result.detail
                );
                if was_active {
                    tracing::warn!("Backend {} marked inactive", target.name);
                }
            }
        }

        tracing::info!(
            "Health check complete. Active: {}, Inactive: {}",
            summary.active,
            summary.inactive
        );
        summary
    }

    /// Probe on a fixed interval, forever. The first pass runs one interval
    /// from now; the startup pass is expected to have happened already.
    pub async fn run(self) {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            ticker.tick().await;
            self.probe_all().await;
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }
}
