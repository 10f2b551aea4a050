//! IP CRD
//!
//! One object per allocated address. The object name *is* the address, so
//! creating it is an atomic claim: the API server rejects a second create with
//! `AlreadyExists`.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Label carrying the name of the GroupSegmentMapping an address belongs to.
pub const SEGMENT_MAPPING_LABEL: &str = "gsm";

/// Annotation carrying the `namespace/name` of the VirtualIP holding the address.
pub const OWNER_ANNOTATION: &str = "virtualips.paas.il/owner";

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[kube(group = "paas.org", version = "v1", kind = "IP", root = "AddressClaim", derive = "PartialEq")]
#[allow(clippy::empty_structs_with_brackets, reason = "the API server expects `spec: {}`")]
pub struct AddressClaimSpec {}

impl AddressClaim {
    /// Segment mapping label, if present.
    pub fn segment_mapping(&self) -> Option<&str> {
        self.metadata
            .labels
            .as_ref()
            .and_then(|labels| labels.get(SEGMENT_MAPPING_LABEL))
            .map(String::as_str)
    }

    /// Owner annotation, if present.
    pub fn owner(&self) -> Option<&str> {
        self.metadata
            .annotations
            .as_ref()
            .and_then(|annotations| annotations.get(OWNER_ANNOTATION))
            .map(String::as_str)
    }
}
