//! Binding an allocated address to a Service.
//!
//! A bound Service carries the address in `spec.externalIPs` and names its
//! keepalived group in an annotation the keepalived operator picks up. With
//! `clone: true` the binding goes onto `<service>-keepalived-clone`, owned by
//! the VirtualIP, and the original Service is left alone.

use crate::config::DEFAULT_KEEPALIVED_GROUP_NAMESPACE;
use crate::error::ControllerError;
use crds::VirtualIP;
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::Resource;

/// Annotation naming the keepalived group that announces the address.
pub const KEEPALIVED_GROUP_ANNOTATION: &str = "keepalived-operator.redhat-cop.io/keepalivedgroup";

/// Suffix appended to the name of a cloned Service.
pub const CLONE_SUFFIX: &str = "-keepalived-clone";

/// Exposure settings fixed at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExposureConfig {
    /// Namespace of the KeepalivedGroup objects
    pub keepalived_group_namespace: String,
}

impl Default for ExposureConfig {
    fn default() -> Self {
        Self {
            keepalived_group_namespace: DEFAULT_KEEPALIVED_GROUP_NAMESPACE.to_string(),
        }
    }
}

impl ExposureConfig {
    /// `<namespace>/<group>` value of the keepalived group annotation.
    pub fn group_reference(&self, keepalived_group: &str) -> String {
        format!("{}/{}", self.keepalived_group_namespace, keepalived_group)
    }

    /// Binds `address` to `service`, or undoes the binding when `remove` is set.
    pub fn patch_service(&self, service: &mut Service, address: &str, keepalived_group: &str, remove: bool) {
        if remove {
            if let Some(annotations) = service.metadata.annotations.as_mut() {
                annotations.remove(KEEPALIVED_GROUP_ANNOTATION);
            }
            if let Some(spec) = service.spec.as_mut() {
                spec.external_ips = None;
            }
            return;
        }

        service.metadata.annotations.get_or_insert_with(Default::default).insert(
            KEEPALIVED_GROUP_ANNOTATION.to_string(),
            self.group_reference(keepalived_group),
        );
        service.spec.get_or_insert_with(Default::default).external_ips = Some(vec![address.to_string()]);
    }
}

/// Name of the clone of `service_name`.
pub fn clone_name(service_name: &str) -> String {
    format!("{service_name}{CLONE_SUFFIX}")
}

/// Builds the clone of `service` owned by `virtual_ip`.
///
/// The clone keeps the original's labels, annotations and spec, minus the
/// server-assigned cluster IPs; everything else in metadata is dropped.
pub fn clone_service(virtual_ip: &VirtualIP, service: &Service) -> Result<Service, ControllerError> {
    let owner = virtual_ip.controller_owner_ref(&()).ok_or_else(|| {
        ControllerError::OwnerReference(format!("VirtualIP {} has no name or uid", virtual_ip.key()))
    })?;
    let name = service
        .metadata
        .name
        .as_deref()
        .ok_or_else(|| ControllerError::InvalidSpec("Service to clone has no name".to_string()))?;

    let mut spec = service.spec.clone().unwrap_or_default();
    spec.cluster_ip = None;
    spec.cluster_ips = None;

    Ok(Service {
        metadata: ObjectMeta {
            name: Some(clone_name(name)),
            namespace: service.metadata.namespace.clone(),
            labels: service.metadata.labels.clone(),
            annotations: service.metadata.annotations.clone(),
            owner_references: Some(vec![owner]),
            ..Default::default()
        },
        spec: Some(spec),
        status: None,
    })
}
