//! Prometheus metrics for the VirtualIP Controller.

use prometheus::{IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

/// Counters exposed on `/metrics`.
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    reconciliations: IntCounterVec,
    addresses_allocated: IntCounter,
    addresses_released: IntCounter,
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics").finish_non_exhaustive()
    }
}

impl Metrics {
    /// Creates the counters and registers them in a private registry.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let reconciliations = IntCounterVec::new(
            Opts::new("virtualip_reconciliations_total", "VirtualIP reconciliations by outcome"),
            &["outcome"],
        )?;
        let addresses_allocated = IntCounter::new(
            "virtualip_addresses_allocated_total",
            "Addresses claimed from a GroupSegmentMapping",
        )?;
        let addresses_released = IntCounter::new(
            "virtualip_addresses_released_total",
            "IP objects deleted while tearing down a VirtualIP",
        )?;

        registry.register(Box::new(reconciliations.clone()))?;
        registry.register(Box::new(addresses_allocated.clone()))?;
        registry.register(Box::new(addresses_released.clone()))?;

        Ok(Self {
            registry,
            reconciliations,
            addresses_allocated,
            addresses_released,
        })
    }

    /// Counts one reconciliation with the given outcome label.
    pub fn record_reconciliation(&self, outcome: &str) {
        self.reconciliations.with_label_values(&[outcome]).inc();
    }

    pub fn record_allocation(&self) {
        self.addresses_allocated.inc();
    }

    pub fn record_release(&self) {
        self.addresses_released.inc();
    }

    /// Renders all counters in the Prometheus text format.
    pub fn render(&self) -> Result<String, prometheus::Error> {
        TextEncoder::new().encode_to_string(&self.registry.gather())
    }
}
