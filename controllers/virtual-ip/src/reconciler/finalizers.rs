//! VirtualIP finalizers.
//!
//! `ip.finalizers...` keeps the VirtualIP around until its `IP` object is
//! deleted; `service.finalizers...` until the Service binding is undone.

use crds::{ADDRESS_FINALIZER, SERVICE_FINALIZER, VirtualIP};

/// Which of the controller's finalizers are present on a VirtualIP.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FinalizerState {
    pub address: bool,
    pub service: bool,
}

impl FinalizerState {
    /// Reads the finalizers present on `virtual_ip`.
    pub fn observe(virtual_ip: &VirtualIP) -> Self {
        let finalizers = virtual_ip.metadata.finalizers.as_deref().unwrap_or_default();
        Self {
            address: finalizers.iter().any(|f| f == ADDRESS_FINALIZER),
            service: finalizers.iter().any(|f| f == SERVICE_FINALIZER),
        }
    }

    /// Copy of `virtual_ip` whose finalizers match `self`.
    ///
    /// Finalizers owned by other controllers keep their position; ours are
    /// appended when added.
    pub fn apply_to(self, virtual_ip: &VirtualIP) -> VirtualIP {
        let mut finalizers: Vec<String> = virtual_ip
            .metadata
            .finalizers
            .iter()
            .flatten()
            .filter(|f| match f.as_str() {
                ADDRESS_FINALIZER => self.address,
                SERVICE_FINALIZER => self.service,
                _ => true,
            })
            .cloned()
            .collect();

        for (wanted, name) in [(self.address, ADDRESS_FINALIZER), (self.service, SERVICE_FINALIZER)] {
            if wanted && !finalizers.iter().any(|f| f == name) {
                finalizers.push(name.to_string());
            }
        }

        let mut updated = virtual_ip.clone();
        updated.metadata.finalizers = Some(finalizers);
        updated
    }
}
