//! Segment selection.
//!
//! A VirtualIP either pins a segment, in which case only the mapping carrying
//! that exact CIDR is used, or leaves it empty and takes the first address any
//! mapping can give, in the order the API server lists them.

use super::Reconciler;
use crate::error::ControllerError;
use crds::{GroupSegmentMapping, VirtualIP};
use kube::ResourceExt;
use std::net::Ipv4Addr;
use tracing::{debug, info};

/// Address claimed for a VirtualIP, with where it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Allocation {
    pub ip: Ipv4Addr,
    pub keepalived_group: String,
    pub segment_mapping: String,
}

impl Allocation {
    fn from_mapping(ip: Ipv4Addr, mapping: &GroupSegmentMapping) -> Self {
        Self {
            ip,
            keepalived_group: mapping.spec.keepalived_group.clone(),
            segment_mapping: mapping.name_any(),
        }
    }
}

impl Reconciler {
    /// Claims an address for `virtual_ip`.
    pub(crate) async fn allocate_address(&self, virtual_ip: &VirtualIP) -> Result<Allocation, ControllerError> {
        let owner = virtual_ip.key();
        let mappings = self.client.list_segment_mappings().await?;

        let requested = virtual_ip.spec.segment.as_str();
        let pinned = if requested.is_empty() {
            None
        } else {
            let mapping = mappings
                .iter()
                .find(|mapping| mapping.spec.segment == requested)
                .ok_or_else(|| ControllerError::SegmentNotFound(requested.to_string()))?;
            Some(mapping)
        };
        let candidates: Vec<&GroupSegmentMapping> = match pinned {
            Some(mapping) => vec![mapping],
            None => mappings.iter().collect(),
        };

        // An address claimed by an earlier pass that failed to record it
        for mapping in &candidates {
            if let Some(ip) = self.owned_address(mapping, &owner).await? {
                info!("Reusing address {} already claimed by {} in {}", ip, owner, mapping.name_any());
                return Ok(Allocation::from_mapping(ip, mapping));
            }
        }

        if let Some(mapping) = pinned {
            let ip = self.reserve_address(mapping, &owner).await?;
            return Ok(Allocation::from_mapping(ip, mapping));
        }

        for mapping in &candidates {
            match self.reserve_address(mapping, &owner).await {
                Ok(ip) => return Ok(Allocation::from_mapping(ip, mapping)),
                Err(ControllerError::PoolExhausted(name)) => {
                    debug!("GroupSegmentMapping {} is exhausted, trying the next one", name);
                }
                Err(e) => return Err(e),
            }
        }

        Err(ControllerError::NoAddressAllocated)
    }
}
