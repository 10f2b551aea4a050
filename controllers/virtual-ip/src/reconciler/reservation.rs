//! Address reservation.
//!
//! An address is claimed by creating the `IP` object named after it. The API
//! server accepts exactly one create per name, so concurrent reservations
//! against the same segment never hand out the same address: the losers see
//! `AlreadyExists` and move on to the next candidate.

use super::Reconciler;
use super::address_pool::{AddressPool, Segment};
use crate::error::ControllerError;
use cluster_client::label_selector;
use crds::{AddressClaim, AddressClaimSpec, GroupSegmentMapping, OWNER_ANNOTATION, SEGMENT_MAPPING_LABEL};
use kube::ResourceExt;
use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use tracing::{debug, info};

/// Sets the segment mapping label and owner annotation of an `IP` object.
pub fn label_address_claim(claim: &mut AddressClaim, segment_mapping: &str, owner: &str) {
    claim
        .labels_mut()
        .insert(SEGMENT_MAPPING_LABEL.to_string(), segment_mapping.to_string());
    claim
        .annotations_mut()
        .insert(OWNER_ANNOTATION.to_string(), owner.to_string());
}

/// `IP` object claiming `address` from `segment_mapping` for `owner`.
pub fn address_claim(address: &str, segment_mapping: &str, owner: &str) -> AddressClaim {
    let mut claim = AddressClaim::new(address, AddressClaimSpec {});
    label_address_claim(&mut claim, segment_mapping, owner);
    claim
}

fn claims_selector(segment_mapping: &str) -> String {
    label_selector(&BTreeMap::from([(
        SEGMENT_MAPPING_LABEL.to_string(),
        segment_mapping.to_string(),
    )]))
}

impl Reconciler {
    /// Address of `mapping` already claimed for `owner` (`namespace/name`).
    ///
    /// Set when a previous pass claimed an address but failed to record it.
    pub(crate) async fn owned_address(
        &self,
        mapping: &GroupSegmentMapping,
        owner: &str,
    ) -> Result<Option<Ipv4Addr>, ControllerError> {
        let claimed = self
            .client
            .list_address_claims(&claims_selector(&mapping.name_any()))
            .await
            .map_err(ControllerError::Reservation)?;

        Ok(claimed
            .iter()
            .filter(|claim| claim.owner() == Some(owner))
            .find_map(|claim| claim.name_any().parse::<Ipv4Addr>().ok()))
    }

    /// Claims a free address of `mapping` on behalf of `owner` (`namespace/name`).
    pub(crate) async fn reserve_address(
        &self,
        mapping: &GroupSegmentMapping,
        owner: &str,
    ) -> Result<Ipv4Addr, ControllerError> {
        let mapping_name = mapping.name_any();
        let segment = Segment::parse(&mapping.spec.segment)?;

        let claimed = self
            .client
            .list_address_claims(&claims_selector(&mapping_name))
            .await
            .map_err(ControllerError::Reservation)?;

        let pool = AddressPool::new(
            segment,
            claimed.iter().filter_map(|claim| claim.metadata.name.as_deref()),
            mapping.spec.excluded_ips.iter().map(String::as_str),
            self.pool_policy,
        );

        for candidate in pool.candidates() {
            let claim = address_claim(&candidate.to_string(), &mapping_name, owner);
            match self.client.create_address_claim(&claim).await {
                Ok(_) => {
                    info!("Claimed address {} from {} for {}", candidate, mapping_name, owner);
                    return Ok(candidate);
                }
                Err(e) if e.is_already_exists() => {
                    debug!("Address {} was claimed concurrently, trying next", candidate);
                }
                Err(e) => return Err(ControllerError::Reservation(e)),
            }
        }

        Err(ControllerError::PoolExhausted(mapping_name))
    }
}
