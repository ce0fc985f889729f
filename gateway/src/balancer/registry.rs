//! Backend registry: the pool of inference backends and their load accounting.
//!
//! Every mutation (selection, release, health updates, admin overrides) goes
//! through one mutex. The lock is synchronous and never held across an
//! `.await`, so a [`BackendSlot`] can release itself from `Drop`.

use std::sync::Arc;

use gateway_common::ServerInfo;
use parking_lot::Mutex;

use crate::config::BackendConfig;
use crate::error::GatewayError;

/// Index of a backend in the registry. Backends are never removed, so an id
/// stays valid for the whole process lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BackendId(usize);

/// One inference backend.
#[derive(Debug, Clone)]
pub struct Backend {
    pub name: String,
    pub host: String,
    pub port: u16,
    /// Only active backends are selectable.
    pub active: bool,
    /// Slots currently held on this backend.
    pub current_load: usize,
    pub max_concurrency: Option<usize>,
    /// Bumped by every ejection and admin toggle. Probe results taken under
    /// an older generation are discarded.
    pub generation: u64,
}

impl Backend {
    fn from_config(config: &BackendConfig) -> Self {
        Self {
            name: config.name.clone(),
            host: config.host.clone(),
            port: config.port,
            active: true,
            current_load: 0,
            max_concurrency: config.max_concurrency,
            generation: 0,
        }
    }

    /// `host:port`
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.address())
    }

    /// A backend without a cap is always under it.
    fn under_cap(&self) -> bool {
        self.max_concurrency
            .map_or(true, |max| self.current_load < max)
    }
}

/// Address of a backend, detached from the registry lock.
#[derive(Debug, Clone)]
pub struct BackendTarget {
    pub id: BackendId,
    pub name: String,
    pub base_url: String,
    /// Backend generation when the target was taken.
    pub generation: u64,
}

#[derive(Debug)]
struct RegistryState {
    backends: Vec<Backend>,
    /// Tie-break cursor among equally loaded candidates.
    rr_index: usize,
}

/// Registry of configured backends.
#[derive(Debug)]
pub struct Registry {
    state: Mutex<RegistryState>,
}

impl Registry {
    /// Create a registry from static configuration. All backends start active;
    /// the startup probe pass establishes the real baseline.
    pub fn new(backends: &[BackendConfig]) -> Self {
        Self {
            state: Mutex::new(RegistryState {
                backends: backends.iter().map(Backend::from_config).collect(),
                rr_index: 0,
            }),
        }
    }

    /// Take a slot on the least loaded active backend.
    ///
    /// Backends under their `max_concurrency` are preferred; if none is, all
    /// active backends compete. Ties on load rotate through the candidates.
    pub fn acquire(self: &Arc<Self>) -> Result<BackendSlot, GatewayError> {
        let mut state = self.state.lock();

        let active: Vec<usize> = state
            .backends
            .iter()
            .enumerate()
            .filter(|(_, b)| b.active)
            .map(|(i, _)| i)
            .collect();
        if active.is_empty() {
            return Err(GatewayError::NoBackendAvailable);
        }

        let under_cap: Vec<usize> = active
            .iter()
            .copied()
            .filter(|&i| state.backends[i].under_cap())
            .collect();
        let pool = if under_cap.is_empty() { active } else { under_cap };

        let min_load = pool
            .iter()
            .map(|&i| state.backends[i].current_load)
            .min()
            .unwrap_or(0);
        let candidates: Vec<usize> = pool
            .into_iter()
            .filter(|&i| state.backends[i].current_load == min_load)
            .collect();

        let chosen = candidates[state.rr_index % candidates.len()];
        state.rr_index = (state.rr_index + 1) % candidates.len().max(1);

        let backend = &mut state.backends[chosen];
        backend.current_load += 1;
        tracing::debug!(
            backend = %backend.name,
            load = backend.current_load,
            "Acquired backend slot"
        );

        Ok(BackendSlot {
            registry: Arc::clone(self),
            id: BackendId(chosen),
            name: backend.name.clone(),
            base_url: backend.base_url(),
        })
    }

    /// Give back one slot. Clamped at zero.
    ///
    /// Normally called by [`BackendSlot`]'s `Drop`; calling it directly for an
    /// id that holds no slot is tolerated.
    pub fn release(&self, id: BackendId) {
        let mut state = self.state.lock();
        let Some(backend) = state.backends.get_mut(id.0) else {
            return;
        };
        if backend.current_load == 0 {
            tracing::warn!("Release on {} with no slot held", backend.name);
            return;
        }
        backend.current_load -= 1;
        tracing::debug!(
            backend = %backend.name,
            load = backend.current_load,
            "Released backend slot"
        );
    }

    /// Point-in-time view of every backend, in registry order.
    pub fn snapshot(&self) -> Vec<ServerInfo> {
        self.state
            .lock()
            .backends
            .iter()
            .map(|b| ServerInfo {
                name: b.name.clone(),
                address: b.address(),
                current_load: b.current_load,
                active: b.active,
            })
            .collect()
    }

    /// Admin override of a backend's active flag, by name.
    pub fn set_active(&self, name: &str, active: bool) -> Result<(), GatewayError> {
        let mut state = self.state.lock();
        let backend = state
            .backends
            .iter_mut()
            .find(|b| b.name == name)
            .ok_or_else(|| GatewayError::NotFound(name.to_string()))?;
        backend.active = active;
        backend.generation += 1;
        Ok(())
    }

    /// Apply a probe outcome unless the backend was ejected or toggled since
    /// `generation` was read.
    ///
    /// Returns the previous active flag, or `None` when the outcome was stale.
    pub fn set_active_if_unchanged(
        &self,
        id: BackendId,
        generation: u64,
        active: bool,
    ) -> Option<bool> {
        let mut state = self.state.lock();
        let backend = state.backends.get_mut(id.0)?;
        if backend.generation != generation {
            return None;
        }
        Some(std::mem::replace(&mut backend.active, active))
    }

    /// Take a backend out of selection after an observed failure, returning
    /// whether it was active.
    ///
    /// Only a successful probe started after this call, or an admin
    /// activation, brings it back.
    pub fn eject(&self, id: BackendId) -> bool {
        let mut state = self.state.lock();
        match state.backends.get_mut(id.0) {
            Some(backend) => {
                backend.generation += 1;
                std::mem::replace(&mut backend.active, false)
            }
            None => false,
        }
    }

    /// Every backend, for the health prober.
    pub fn targets(&self) -> Vec<BackendTarget> {
        self.state
            .lock()
            .backends
            .iter()
            .enumerate()
            .map(|(i, b)| BackendTarget {
                id: BackendId(i),
                name: b.name.clone(),
                base_url: b.base_url(),
                generation: b.generation,
            })
            .collect()
    }

    /// Active backends, least loaded first.
    pub fn active_targets(&self) -> Vec<BackendTarget> {
        let state = self.state.lock();
        let mut active: Vec<(usize, &Backend)> = state
            .backends
            .iter()
            .enumerate()
            .filter(|(_, b)| b.active)
            .collect();
        active.sort_by_key(|(_, b)| b.current_load);
        active
            .into_iter()
            .map(|(i, b)| BackendTarget {
                id: BackendId(i),
                name: b.name.clone(),
                base_url: b.base_url(),
                generation: b.generation,
            })
            .collect()
    }

    /// Sum of held slots across all backends.
    pub fn total_load(&self) -> usize {
        self.state
            .lock()
            .backends
            .iter()
            .map(|b| b.current_load)
            .sum()
    }

    /// Look up one backend by name.
    pub fn get(&self, name: &str) -> Option<Backend> {
        self.state
            .lock()
            .backends
            .iter()
            .find(|b| b.name == name)
            .cloned()
    }
}

/// One held unit of load on a backend.
///
/// Returned by [`Registry::acquire`]; the slot is released exactly once, when
/// this value is dropped, whatever path the request took.
#[derive(Debug)]
pub struct BackendSlot {
    registry: Arc<Registry>,
    id: BackendId,
    name: String,
    base_url: String,
}

impl BackendSlot {
    pub fn id(&self) -> BackendId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

impl Drop for BackendSlot {
    fn drop(&mut self) {
        self.registry.release(self.id);
    }
}
