//! Test utilities for unit testing reconcilers
//!
//! This module provides helpers for creating test data and setting up test scenarios.

use crate::metrics::Metrics;
use crate::reconciler::Reconciler;
use crate::reconciler::address_pool::PoolPolicy;
use crate::reconciler::exposure::ExposureConfig;
use cluster_client::MockClusterClient;
use crds::{GroupSegmentMapping, GroupSegmentMappingSpec, VirtualIP, VirtualIPSpec};
use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Helper to create test VirtualIP CRD
pub fn create_test_virtual_ip(name: &str, namespace: &str, service: &str, segment: &str, clone: bool) -> VirtualIP {
    VirtualIP {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        spec: VirtualIPSpec {
            segment: segment.to_string(),
            service: service.to_string(),
            clone,
        },
        status: None,
    }
}

/// Helper to create test GroupSegmentMapping CRD
pub fn create_test_segment_mapping(
    name: &str,
    segment: &str,
    excluded_ips: &[&str],
    keepalived_group: &str,
) -> GroupSegmentMapping {
    GroupSegmentMapping::new(
        name,
        GroupSegmentMappingSpec {
            segment: segment.to_string(),
            excluded_ips: excluded_ips.iter().map(|ip| (*ip).to_string()).collect(),
            keepalived_group: keepalived_group.to_string(),
        },
    )
}

/// Helper to create a ClusterIP Service selecting `app=<name>`
pub fn create_test_service(name: &str, namespace: &str) -> Service {
    Service {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            selector: Some(BTreeMap::from([("app".to_string(), name.to_string())])),
            ports: Some(vec![ServicePort {
                port: 80,
                ..Default::default()
            }]),
            ..Default::default()
        }),
        status: None,
    }
}

/// Reconciler over `mock` with the default pool policy
pub fn test_reconciler(mock: MockClusterClient) -> Reconciler {
    test_reconciler_with_policy(mock, PoolPolicy::default())
}

/// Reconciler over `mock` with the given pool policy
pub fn test_reconciler_with_policy(mock: MockClusterClient, pool_policy: PoolPolicy) -> Reconciler {
    let metrics = Arc::new(Metrics::new().unwrap());
    Reconciler::new(
        mock,
        ExposureConfig {
            keepalived_group_namespace: "keepalived-operator".to_string(),
        },
        pool_policy,
        metrics,
        (5, 300),
    )
}
