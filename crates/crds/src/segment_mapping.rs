//! GroupSegmentMapping CRD
//!
//! Defines a CIDR pool of virtual addresses and the keepalived group that
//! serves it. Owned by a separate controller; read-only here.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[kube(
    group = "paas.org",
    version = "v1",
    kind = "GroupSegmentMapping",
    shortname = "gsm",
    printcolumn = r#"{"name":"Segment","type":"string","jsonPath":".spec.segment"}"#,
    printcolumn = r#"{"name":"KeepalivedGroup","type":"string","jsonPath":".spec.keepalivedGroup"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct GroupSegmentMappingSpec {
    /// IPv4 CIDR of the pool (e.g. "10.0.0.0/24")
    pub segment: String,

    /// Addresses inside the segment that must never be allocated
    #[serde(default, rename = "excludedIPs", skip_serializing_if = "Vec::is_empty")]
    pub excluded_ips: Vec<String>,

    /// Keepalived group serving the segment
    pub keepalived_group: String,
}
