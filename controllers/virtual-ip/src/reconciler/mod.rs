//! Reconciliation logic for VirtualIP objects.
//!
//! - `address_pool`: segment CIDR parsing and candidate ordering
//! - `reservation`: claiming one address with create-if-absent `IP` objects
//! - `allocation`: choosing the GroupSegmentMapping(s) to draw from
//! - `exposure`: binding an address to a Service (in place or on a clone)
//! - `finalizers`: the two VirtualIP finalizers as explicit state
//! - `status`: the single status write path
//! - `lifecycle`: the per-object state machine tying it all together

pub mod address_pool;
pub mod allocation;
pub mod exposure;
pub mod finalizers;
pub mod lifecycle;
pub mod reservation;
pub mod status;

#[cfg(test)]
mod lifecycle_test;

use crate::backoff::FibonacciBackoff;
use crate::metrics::Metrics;
use address_pool::PoolPolicy;
use cluster_client::ClusterClientTrait;
use exposure::ExposureConfig;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::warn;

pub use lifecycle::{ReconcileOutcome, Transition};

/// Backoff state for a resource
#[derive(Debug, Clone)]
struct BackoffState {
    backoff: FibonacciBackoff,
    error_count: u32,
}

impl BackoffState {
    fn new(min_seconds: u64, max_seconds: u64) -> Self {
        Self {
            backoff: FibonacciBackoff::new(min_seconds, max_seconds),
            error_count: 0,
        }
    }

    fn increment_error(&mut self) {
        self.error_count += 1;
    }

    fn reset(&mut self) {
        self.error_count = 0;
        self.backoff.reset();
    }
}

/// Reconciles VirtualIP objects.
pub struct Reconciler {
    pub(crate) client: Box<dyn ClusterClientTrait + Send + Sync>,
    pub(crate) exposure: ExposureConfig,
    pub(crate) pool_policy: PoolPolicy,
    pub(crate) metrics: Arc<Metrics>,
    backoff_bounds: (u64, u64),
    /// Error count tracking per resource (namespace/name -> BackoffState)
    backoff_states: Arc<Mutex<HashMap<String, BackoffState>>>,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("exposure", &self.exposure)
            .field("pool_policy", &self.pool_policy)
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    /// Creates a new reconciler.
    ///
    /// `backoff_bounds` is the (min, max) requeue delay in seconds applied to
    /// objects whose reconciliation keeps failing.
    pub fn new(
        client: impl ClusterClientTrait + Send + Sync + 'static,
        exposure: ExposureConfig,
        pool_policy: PoolPolicy,
        metrics: Arc<Metrics>,
        backoff_bounds: (u64, u64),
    ) -> Self {
        Self {
            client: Box::new(client),
            exposure,
            pool_policy,
            metrics,
            backoff_bounds,
            backoff_states: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Get the next backoff (seconds) and the consecutive error count for a resource
    pub fn get_backoff_for_resource(&self, resource_key: &str) -> (u64, u32) {
        let (min, max) = self.backoff_bounds;
        match self.backoff_states.lock() {
            Ok(mut states) => {
                let state = states
                    .entry(resource_key.to_string())
                    .or_insert_with(|| BackoffState::new(min, max));
                (state.backoff.next_backoff_seconds(), state.error_count)
            }
            Err(e) => {
                warn!("Failed to lock backoff_states: {}, using minimum backoff", e);
                (min, 0)
            }
        }
    }

    /// Increment error count for a resource
    pub fn increment_error(&self, resource_key: &str) {
        let (min, max) = self.backoff_bounds;
        if let Ok(mut states) = self.backoff_states.lock() {
            states
                .entry(resource_key.to_string())
                .or_insert_with(|| BackoffState::new(min, max))
                .increment_error();
        }
    }

    /// Reset error count for a resource (on successful reconciliation)
    pub fn reset_error(&self, resource_key: &str) {
        if let Ok(mut states) = self.backoff_states.lock() {
            if let Some(state) = states.get_mut(resource_key) {
                state.reset();
            }
        }
    }

    /// Drop all backoff state of a resource that no longer exists
    pub fn forget_resource(&self, resource_key: &str) {
        if let Ok(mut states) = self.backoff_states.lock() {
            states.remove(resource_key);
        }
    }
}
