//! VirtualIP CRD
//!
//! Requests a virtual IPv4 address for a Service. The controller allocates the
//! address from a `GroupSegmentMapping` and binds it to the Service (or to an
//! owned clone of it).

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Finalizer guarding the `IP` record that holds the allocated address.
pub const ADDRESS_FINALIZER: &str = "ip.finalizers.virtualips.paas.org";

/// Finalizer guarding the address binding on the target Service.
pub const SERVICE_FINALIZER: &str = "service.finalizers.virtualips.paas.org";

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[kube(
    group = "paas.org",
    version = "v1",
    kind = "VirtualIP",
    namespaced,
    status = "VirtualIPStatus",
    derive = "PartialEq",
    shortname = "vip",
    printcolumn = r#"{"name":"IP","type":"string","jsonPath":".status.ip"}"#,
    printcolumn = r#"{"name":"Service","type":"string","jsonPath":".status.service"}"#,
    printcolumn = r#"{"name":"State","type":"string","jsonPath":".status.state"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct VirtualIPSpec {
    /// CIDR of the segment to allocate from (empty = any segment)
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub segment: String,

    /// Name of the Service to expose
    pub service: String,

    /// Expose an owned clone of the Service instead of patching it in place
    #[serde(default)]
    pub clone: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VirtualIPStatus {
    /// Allocated address
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,

    /// Name of the GroupSegmentMapping the address was drawn from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gsm: Option<String>,

    /// Keepalived group of the owning segment
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keepalived_group: Option<String>,

    /// Service actually bound to the address
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,

    /// Clone flag as committed when the service was recorded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clone: Option<bool>,

    /// Lifecycle state (absent until the first transition)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<VirtualIPState>,

    /// Human-readable outcome of the latest reconciliation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// VirtualIP lifecycle state
///
/// Serializes as PascalCase ("CreatingIP", "Valid", etc.).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub enum VirtualIPState {
    /// The latest transition failed; see `message`
    Error,

    /// Address reserved, `IP` record being guarded
    #[serde(rename = "CreatingIP")]
    CreatingIp,

    /// Target service recorded, binding in progress
    Exposing,

    /// Address bound to the service
    Valid,
}

impl VirtualIPStatus {
    /// Allocated address, if one has been recorded.
    pub fn allocated_ip(&self) -> Option<&str> {
        self.ip.as_deref().filter(|ip| !ip.is_empty())
    }

    /// Bound service name, if one has been recorded.
    pub fn bound_service(&self) -> Option<&str> {
        self.service.as_deref().filter(|svc| !svc.is_empty())
    }
}

impl VirtualIP {
    /// Whether the control plane has requested deletion of this object.
    pub fn is_deleting(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    /// `namespace/name` key, used for logging and the `IP` owner annotation.
    pub fn key(&self) -> String {
        format!(
            "{}/{}",
            self.metadata.namespace.as_deref().unwrap_or_default(),
            self.metadata.name.as_deref().unwrap_or_default()
        )
    }
}
