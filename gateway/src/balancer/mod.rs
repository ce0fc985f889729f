//! Load balancing over the backend pool.
//!
//! - [`registry`]: backend state, slot accounting and least-loaded selection
//! - [`client`]: HTTP calls to backends and failure classification
//! - [`retry`]: attempt budget shared by both request paths
//! - [`router`]: single-shot routing with failover
//! - [`stream`]: streaming relay
//! - [`health`]: periodic probing

pub mod client;
pub mod health;
pub mod registry;
pub mod retry;
pub mod router;
pub mod stream;

pub use client::{BackendClient, BackendError, ProbeResult};
pub use health::{HealthProber, ProbeSummary};
pub use registry::{Backend, BackendId, BackendSlot, BackendTarget, Registry};
pub use retry::Failover;
pub use router::{BalancedRouter, Routed};
pub use stream::{LineBuffer, StreamRelay};
