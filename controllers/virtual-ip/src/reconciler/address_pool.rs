//! Address pool resolution.
//!
//! Turns a segment CIDR plus the addresses that are already claimed or
//! excluded into the ordered list of candidates a reservation walks through.

use crate::error::ControllerError;
use ipnet::{IpNet, Ipv4AddrRange, Ipv4Net};
use std::collections::HashSet;
use std::net::Ipv4Addr;

/// Pool-wide allocation policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolPolicy {
    /// Skip the network and broadcast addresses of segments shorter than /31
    pub exclude_subnet_boundaries: bool,
}

/// Parsed IPv4 segment (host bits masked off).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment(Ipv4Net);

impl Segment {
    /// Parses an IPv4 CIDR such as `10.0.0.0/24`.
    ///
    /// Host bits are masked off, so `10.0.0.7/24` parses to `10.0.0.0/24`.
    pub fn parse(cidr: &str) -> Result<Self, ControllerError> {
        let invalid = |reason: String| ControllerError::InvalidSegment {
            segment: cidr.to_string(),
            reason,
        };

        match cidr.trim().parse::<IpNet>().map_err(|e| invalid(e.to_string()))? {
            IpNet::V4(net) => Ok(Self(net.trunc())),
            IpNet::V6(_) => Err(invalid("IPv6 segments are not supported".to_string())),
        }
    }

    /// Addresses of the segment, ascending. Without boundaries, the network
    /// and broadcast addresses are left out of segments shorter than /31.
    pub fn addresses(&self, with_boundaries: bool) -> Ipv4AddrRange {
        if with_boundaries {
            Ipv4AddrRange::new(self.0.network(), self.0.broadcast())
        } else {
            self.0.hosts()
        }
    }
}

/// Free addresses of one segment.
#[derive(Debug, Clone)]
pub struct AddressPool {
    segment: Segment,
    unavailable: HashSet<Ipv4Addr>,
    policy: PoolPolicy,
}

impl AddressPool {
    /// Builds the pool from the claimed and excluded address strings.
    ///
    /// Strings that are not IPv4 addresses can never match a candidate and are
    /// ignored.
    pub fn new<'a>(
        segment: Segment,
        claimed: impl IntoIterator<Item = &'a str>,
        excluded: impl IntoIterator<Item = &'a str>,
        policy: PoolPolicy,
    ) -> Self {
        let unavailable: HashSet<Ipv4Addr> = claimed
            .into_iter()
            .chain(excluded)
            .filter_map(|address| address.trim().parse().ok())
            .collect();
        Self {
            segment,
            unavailable,
            policy,
        }
    }

    /// Candidate addresses in ascending order.
    pub fn candidates(&self) -> impl Iterator<Item = Ipv4Addr> + '_ {
        self.segment
            .addresses(!self.policy.exclude_subnet_boundaries)
            .filter(|address| !self.unavailable.contains(address))
    }
}
