//! VirtualIP lifecycle.
//!
//! Each invocation re-reads the VirtualIP and performs exactly one step:
//!
//! | Observed | Step | Status |
//! |---|---|---|
//! | deleting, address finalizer | delete the `IP`, drop the address finalizer | untouched |
//! | no address recorded | allocate one | `CreatingIP` |
//! | address finalizer missing | sync the `IP`, add the address finalizer | untouched |
//! | no service recorded | record `spec.service` / `spec.clone` | `Exposing` |
//! | service finalizer missing (or deleting) | bind (or unbind), add (or drop) the service finalizer | untouched |
//! | otherwise | sync the `IP` and the binding | `Valid` |
//!
//! Finalizer writes change the object and trigger the next invocation; status
//! writes do the same. A failed step is written into the status as `Error`
//! and the object is requeued.

use super::Reconciler;
use super::exposure::clone_service;
use super::finalizers::FinalizerState;
use super::reservation::label_address_claim;
use crate::error::{ControllerError, ResultExt};
use crds::{AddressClaim, AddressClaimSpec, VirtualIP, VirtualIPState, VirtualIPStatus};
use tracing::{debug, error, info, warn};

const MESSAGE_CREATING_IP: &str = "creating IP object for the service";
const MESSAGE_EXPOSING: &str = "exposing service with an external IP";
const MESSAGE_VALID: &str = "successfully allocated an IP address";

/// Step taken by one reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// An address was claimed and recorded (`CreatingIP`)
    AddressAllocated,
    /// The address finalizer was added
    AddressGuarded,
    /// The target service was recorded (`Exposing`)
    ExposureRecorded,
    /// The service was bound and the service finalizer added
    ServiceBound,
    /// Everything in place (`Valid`)
    Valid,
    /// The `IP` object was deleted and the address finalizer dropped
    AddressReleased,
    /// The binding was undone and the service finalizer dropped
    ServiceReleased,
    /// Being deleted with nothing left for this controller to undo
    Released,
}

/// Result of one reconciliation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The VirtualIP no longer exists
    Absent,
    /// A step was taken
    Transitioned(Transition),
    /// A step failed; the message was recorded in the status
    Failed(String),
}

impl ReconcileOutcome {
    /// Metrics label.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Absent => "absent",
            Self::Transitioned(Transition::Valid) => "valid",
            Self::Transitioned(_) => "progressed",
            Self::Failed(_) => "failed",
        }
    }
}

impl Reconciler {
    /// Reconciles the VirtualIP `namespace/name`.
    ///
    /// Step failures are recorded in the status and reported as
    /// `ReconcileOutcome::Failed`. An `Err` means the object could not be read
    /// or the status could not be written.
    pub async fn reconcile_virtual_ip(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<ReconcileOutcome, ControllerError> {
        let virtual_ip = match self.client.get_virtual_ip(namespace, name).await {
            Ok(virtual_ip) => virtual_ip,
            Err(e) if e.is_not_found() => {
                debug!("VirtualIP {}/{} no longer exists", namespace, name);
                self.metrics.record_reconciliation(ReconcileOutcome::Absent.label());
                return Ok(ReconcileOutcome::Absent);
            }
            Err(e) => return Err(e.into()),
        };
        let key = virtual_ip.key();
        debug!("Reconciling VirtualIP {}", key);

        let mut status = virtual_ip.status.clone().unwrap_or_default();
        let outcome = match self.advance(&virtual_ip, &mut status).await {
            Ok(transition) => {
                info!("VirtualIP {}: {:?}", key, transition);
                ReconcileOutcome::Transitioned(transition)
            }
            Err(e) => {
                let message = e.to_string();
                error!("Failed to reconcile VirtualIP {}: {}", key, message);
                status.state = Some(VirtualIPState::Error);
                status.message = Some(message.clone());
                ReconcileOutcome::Failed(message)
            }
        };

        self.report_status(&virtual_ip, status).await?;
        self.metrics.record_reconciliation(outcome.label());
        Ok(outcome)
    }

    /// Performs the next step. Only mutates `status` on success.
    async fn advance(
        &self,
        virtual_ip: &VirtualIP,
        status: &mut VirtualIPStatus,
    ) -> Result<Transition, ControllerError> {
        let deleting = virtual_ip.is_deleting();
        let finalizers = FinalizerState::observe(virtual_ip);

        if deleting {
            if finalizers.address {
                return self.release_address(virtual_ip, status, finalizers).await;
            }
        } else {
            if virtual_ip.spec.service.trim().is_empty() {
                return Err(ControllerError::InvalidSpec("spec.service must not be empty".to_string()));
            }

            let Some(ip) = status.allocated_ip().map(str::to_owned) else {
                let allocation = self
                    .allocate_address(virtual_ip)
                    .await
                    .context("could not allocate an IP")?;
                self.metrics.record_allocation();
                status.ip = Some(allocation.ip.to_string());
                status.keepalived_group = Some(allocation.keepalived_group);
                status.gsm = Some(allocation.segment_mapping);
                status.state = Some(VirtualIPState::CreatingIp);
                status.message = Some(MESSAGE_CREATING_IP.to_string());
                return Ok(Transition::AddressAllocated);
            };

            self.sync_address_claim(virtual_ip, &ip, status.gsm.as_deref().unwrap_or_default())
                .await
                .context("could not create/update an IP object")?;

            if !finalizers.address {
                self.write_finalizers(virtual_ip, FinalizerState { address: true, ..finalizers })
                    .await
                    .context("could not add finalizer for IP object")?;
                return Ok(Transition::AddressGuarded);
            }
        }

        let Some(service) = status.bound_service().map(str::to_owned) else {
            if deleting {
                return Ok(Transition::Released);
            }
            status.service = Some(virtual_ip.spec.service.clone());
            status.clone = Some(virtual_ip.spec.clone);
            status.state = Some(VirtualIPState::Exposing);
            status.message = Some(MESSAGE_EXPOSING.to_string());
            return Ok(Transition::ExposureRecorded);
        };

        if let Some(transition) = self.expose(virtual_ip, status, &service, finalizers).await? {
            return Ok(transition);
        }

        status.state = Some(VirtualIPState::Valid);
        status.message = Some(MESSAGE_VALID.to_string());
        Ok(Transition::Valid)
    }

    /// Deletes the `IP` object and drops the address finalizer.
    async fn release_address(
        &self,
        virtual_ip: &VirtualIP,
        status: &VirtualIPStatus,
        finalizers: FinalizerState,
    ) -> Result<Transition, ControllerError> {
        match status.allocated_ip() {
            Some(ip) => match self.client.delete_address_claim(ip).await {
                Ok(()) => {
                    self.metrics.record_release();
                    info!("Released address {} of VirtualIP {}", ip, virtual_ip.key());
                }
                Err(e) if e.is_not_found() => {
                    debug!("IP object {} already deleted", ip);
                }
                Err(e) => return Err(e).context("could not delete IP object"),
            },
            None => warn!("VirtualIP {} has an address finalizer but no address", virtual_ip.key()),
        }

        self.write_finalizers(virtual_ip, FinalizerState { address: false, ..finalizers })
            .await
            .context("could not remove finalizer for IP object")?;
        Ok(Transition::AddressReleased)
    }

    /// Makes sure the `IP` object of `ip` exists and carries our label and owner annotation.
    async fn sync_address_claim(
        &self,
        virtual_ip: &VirtualIP,
        ip: &str,
        segment_mapping: &str,
    ) -> Result<AddressClaim, ControllerError> {
        let owner = virtual_ip.key();
        let template = AddressClaim::new(ip, AddressClaimSpec {});
        let claim = self
            .client
            .create_or_update_address_claim(&template, &|claim: &mut AddressClaim| {
                label_address_claim(claim, segment_mapping, &owner);
            })
            .await?;
        Ok(claim)
    }

    /// Binds (or, while deleting, unbinds) the address and moves the service finalizer.
    ///
    /// Returns `None` when the binding was already in place and guarded.
    async fn expose(
        &self,
        virtual_ip: &VirtualIP,
        status: &VirtualIPStatus,
        service_name: &str,
        finalizers: FinalizerState,
    ) -> Result<Option<Transition>, ControllerError> {
        let deleting = virtual_ip.is_deleting();
        let clone = status.clone.unwrap_or(virtual_ip.spec.clone);

        // A clone is owned by the VirtualIP and goes away with it
        if !(deleting && clone) {
            self.patch_target(virtual_ip, status, service_name, clone, deleting).await?;
        }

        if deleting {
            if !finalizers.service {
                return Ok(Some(Transition::Released));
            }
            self.write_finalizers(virtual_ip, FinalizerState { service: false, ..finalizers })
                .await
                .context("could not remove finalizer for service")?;
            return Ok(Some(Transition::ServiceReleased));
        }

        if !finalizers.service {
            self.write_finalizers(virtual_ip, FinalizerState { service: true, ..finalizers })
                .await
                .context("could not add finalizer for service")?;
            return Ok(Some(Transition::ServiceBound));
        }

        Ok(None)
    }

    /// Applies the bind/unbind patch to the target Service or its clone.
    async fn patch_target(
        &self,
        virtual_ip: &VirtualIP,
        status: &VirtualIPStatus,
        service_name: &str,
        clone: bool,
        remove: bool,
    ) -> Result<(), ControllerError> {
        let namespace = virtual_ip.metadata.namespace.as_deref().unwrap_or_default();

        let service = match self.client.get_service(namespace, service_name).await {
            Ok(service) => service,
            Err(e) if e.is_not_found() && remove => {
                warn!(
                    "Service {}/{} is gone, nothing to unbind for VirtualIP {}",
                    namespace,
                    service_name,
                    virtual_ip.key()
                );
                return Ok(());
            }
            Err(e) if e.is_not_found() => {
                return Err(ControllerError::ServiceNotFound(format!("{namespace}/{service_name}")))
                    .context("could not get service to be exposed");
            }
            Err(e) => return Err(e).context("could not get service to be exposed"),
        };

        let target = if clone {
            clone_service(virtual_ip, &service).context("received error while cloning service")?
        } else {
            service
        };

        let ip = status.allocated_ip().unwrap_or_default();
        let group = status.keepalived_group.as_deref().unwrap_or_default();
        self.client
            .create_or_update_service(&target, &|service| {
                self.exposure.patch_service(service, ip, group, remove);
            })
            .await
            .context("failed to create/update the service")?;
        Ok(())
    }

    async fn write_finalizers(&self, virtual_ip: &VirtualIP, desired: FinalizerState) -> Result<(), ControllerError> {
        self.client.update_virtual_ip(&desired.apply_to(virtual_ip)).await?;
        Ok(())
    }
}
