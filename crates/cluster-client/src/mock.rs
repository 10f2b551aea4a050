//! Mock ClusterClient for unit testing
//!
//! This module provides an in-memory implementation of `ClusterClientTrait`
//! that behaves like the API server for the operations the controller uses:
//! create-if-absent, resourceVersion checks on metadata writes, finalizer-gated
//! deletion, and cluster IP allocation for Services.

use crate::cluster_trait::{ClusterClientTrait, Mutation};
use crate::common::selector_matches;
use crate::error::ClusterError;
use crds::{AddressClaim, AddressClaimSpec, GroupSegmentMapping, SEGMENT_MAPPING_LABEL, VirtualIP};
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Store operations, used to inject failures and count calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockOperation {
    GetVirtualIp,
    UpdateVirtualIp,
    UpdateVirtualIpStatus,
    ListSegmentMappings,
    ListAddressClaims,
    CreateAddressClaim,
    CreateOrUpdateAddressClaim,
    DeleteAddressClaim,
    GetService,
    CreateOrUpdateService,
}

type NamespacedKey = (String, String);

#[derive(Debug, Default)]
struct MockState {
    virtual_ips: BTreeMap<NamespacedKey, VirtualIP>,
    // Vec keeps insertion order, which stands in for the API server's listing order
    segment_mappings: Vec<GroupSegmentMapping>,
    address_claims: BTreeMap<String, AddressClaim>,
    services: BTreeMap<NamespacedKey, Service>,
    injected_failures: VecDeque<MockOperation>,
    calls: HashMap<MockOperation, usize>,
    next_resource_version: u64,
    next_uid: u64,
    next_cluster_ip: u32,
}

impl MockState {
    /// Counts the call and fails it if a failure was injected for `op`.
    fn record(&mut self, op: MockOperation) -> Result<(), ClusterError> {
        *self.calls.entry(op).or_default() += 1;
        if let Some(pos) = self.injected_failures.iter().position(|f| *f == op) {
            self.injected_failures.remove(pos);
            return Err(ClusterError::Unavailable(format!("injected failure for {op:?}")));
        }
        Ok(())
    }

    fn bump(&mut self, meta: &mut ObjectMeta) {
        self.next_resource_version += 1;
        meta.resource_version = Some(self.next_resource_version.to_string());
    }

    fn admit(&mut self, meta: &mut ObjectMeta) -> Result<(), ClusterError> {
        if meta.resource_version.as_deref().is_some_and(|rv| !rv.is_empty()) {
            return Err(ClusterError::InvalidObject(
                "resourceVersion should not be set on objects to be created".to_string(),
            ));
        }
        self.next_uid += 1;
        meta.uid = Some(format!("00000000-0000-0000-0000-{:012}", self.next_uid));
        self.bump(meta);
        Ok(())
    }

    fn cluster_ip_in_use(&self, ip: &str) -> bool {
        self.services.values().any(|svc| {
            svc.spec.as_ref().is_some_and(|spec| {
                spec.cluster_ip.as_deref() == Some(ip)
                    || spec.cluster_ips.as_ref().is_some_and(|ips| ips.iter().any(|i| i == ip))
            })
        })
    }

    fn admit_service(&mut self, service: &mut Service) -> Result<(), ClusterError> {
        let spec = service.spec.get_or_insert_with(Default::default);
        let requested: Vec<String> = spec
            .cluster_ip
            .iter()
            .chain(spec.cluster_ips.iter().flatten())
            .filter(|ip| !ip.is_empty() && ip.as_str() != "None")
            .cloned()
            .collect();
        if let Some(taken) = requested.iter().find(|ip| self.cluster_ip_in_use(ip)) {
            return Err(ClusterError::InvalidObject(format!(
                "spec.clusterIPs: Invalid value: {taken}: provided IP is already allocated"
            )));
        }
        if requested.is_empty() {
            self.next_cluster_ip += 1;
            let ip = format!("10.96.{}.{}", self.next_cluster_ip / 256, self.next_cluster_ip % 256);
            let spec = service.spec.get_or_insert_with(Default::default);
            spec.cluster_ip = Some(ip.clone());
            spec.cluster_ips = Some(vec![ip]);
        }
        self.admit(&mut service.metadata)
    }
}

fn namespaced_key(meta: &ObjectMeta) -> Result<NamespacedKey, ClusterError> {
    let namespace = meta
        .namespace
        .clone()
        .ok_or_else(|| ClusterError::InvalidObject("namespace is missing".to_string()))?;
    let name = meta
        .name
        .clone()
        .ok_or_else(|| ClusterError::InvalidObject("name is missing".to_string()))?;
    Ok((namespace, name))
}

fn deletion_timestamp() -> Option<Time> {
    serde_json::from_value(serde_json::json!("2026-01-01T00:00:00Z")).ok()
}

/// Mock ClusterClient for testing
///
/// Clones share the same store, so several reconcilers (or tasks) can race
/// against one mock.
#[derive(Debug, Clone, Default)]
pub struct MockClusterClient {
    state: Arc<Mutex<MockState>>,
}

impl MockClusterClient {
    /// Create a new, empty mock store
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a VirtualIP (for test setup). Assigns uid and resourceVersion.
    pub fn add_virtual_ip(&self, mut virtual_ip: VirtualIP) -> VirtualIP {
        let mut state = self.state();
        virtual_ip.metadata.namespace.get_or_insert_with(|| "default".to_string());
        virtual_ip.metadata.resource_version = None;
        if state.admit(&mut virtual_ip.metadata).is_ok() {
            if let Ok(key) = namespaced_key(&virtual_ip.metadata) {
                state.virtual_ips.insert(key, virtual_ip.clone());
            }
        }
        virtual_ip
    }

    /// Add a GroupSegmentMapping (for test setup). Listing order is insertion order.
    pub fn add_segment_mapping(&self, mapping: GroupSegmentMapping) {
        self.state().segment_mappings.push(mapping);
    }

    /// Add a Service (for test setup). Assigns uid, resourceVersion and a cluster IP.
    pub fn add_service(&self, mut service: Service) -> Service {
        let mut state = self.state();
        service.metadata.namespace.get_or_insert_with(|| "default".to_string());
        service.metadata.resource_version = None;
        if state.admit_service(&mut service).is_ok() {
            if let Ok(key) = namespaced_key(&service.metadata) {
                state.services.insert(key, service.clone());
            }
        }
        service
    }

    /// Remove a Service (for test setup), as if deleted out of band
    pub fn delete_service(&self, namespace: &str, name: &str) -> Option<Service> {
        self.state()
            .services
            .remove(&(namespace.to_string(), name.to_string()))
    }

    /// Pre-claim an address in a segment mapping (for test setup)
    pub fn claim_address(&self, address: &str, segment_mapping: &str) {
        let mut state = self.state();
        let mut claim = AddressClaim::new(address, AddressClaimSpec {});
        claim.metadata.labels = Some(BTreeMap::from([(
            SEGMENT_MAPPING_LABEL.to_string(),
            segment_mapping.to_string(),
        )]));
        if state.admit(&mut claim.metadata).is_ok() {
            state.address_claims.insert(address.to_string(), claim);
        }
    }

    /// Mimic `kubectl delete`: set deletionTimestamp while finalizers remain,
    /// remove the object otherwise.
    pub fn request_virtual_ip_deletion(&self, namespace: &str, name: &str) {
        let mut state = self.state();
        let key = (namespace.to_string(), name.to_string());
        let has_finalizers = state
            .virtual_ips
            .get(&key)
            .and_then(|vip| vip.metadata.finalizers.as_ref())
            .is_some_and(|f| !f.is_empty());
        if has_finalizers {
            state.next_resource_version += 1;
            let resource_version = state.next_resource_version.to_string();
            if let Some(vip) = state.virtual_ips.get_mut(&key) {
                vip.metadata.deletion_timestamp = deletion_timestamp();
                vip.metadata.resource_version = Some(resource_version);
            }
        } else {
            state.virtual_ips.remove(&key);
        }
    }

    /// Make the next call of `op` fail with `ClusterError::Unavailable`
    pub fn fail_next(&self, op: MockOperation) {
        self.state().injected_failures.push_back(op);
    }

    /// Number of times `op` has been called
    pub fn call_count(&self, op: MockOperation) -> usize {
        self.state().calls.get(&op).copied().unwrap_or_default()
    }

    /// Current stored VirtualIP
    pub fn virtual_ip(&self, namespace: &str, name: &str) -> Option<VirtualIP> {
        self.state()
            .virtual_ips
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    /// Current stored Service
    pub fn service(&self, namespace: &str, name: &str) -> Option<Service> {
        self.state()
            .services
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    /// Current stored IP object
    pub fn address_claim(&self, name: &str) -> Option<AddressClaim> {
        self.state().address_claims.get(name).cloned()
    }

    /// All stored IP objects, ordered by name
    pub fn address_claims(&self) -> Vec<AddressClaim> {
        self.state().address_claims.values().cloned().collect()
    }
}

#[async_trait::async_trait]
impl ClusterClientTrait for MockClusterClient {
    async fn get_virtual_ip(&self, namespace: &str, name: &str) -> Result<VirtualIP, ClusterError> {
        let mut state = self.state();
        state.record(MockOperation::GetVirtualIp)?;
        state
            .virtual_ips
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| ClusterError::NotFound(format!("VirtualIP {namespace}/{name}")))
    }

    async fn update_virtual_ip(&self, virtual_ip: &VirtualIP) -> Result<VirtualIP, ClusterError> {
        let mut state = self.state();
        state.record(MockOperation::UpdateVirtualIp)?;
        let key = namespaced_key(&virtual_ip.metadata)?;
        let mut stored = state
            .virtual_ips
            .get(&key)
            .cloned()
            .ok_or_else(|| ClusterError::NotFound(format!("VirtualIP {}/{}", key.0, key.1)))?;

        if let Some(rv) = virtual_ip.metadata.resource_version.as_deref() {
            if stored.metadata.resource_version.as_deref() != Some(rv) {
                return Err(ClusterError::Conflict(format!(
                    "VirtualIP {}/{}: the object has been modified",
                    key.0, key.1
                )));
            }
        }

        let requested = virtual_ip.metadata.finalizers.clone().unwrap_or_default();
        let current = stored.metadata.finalizers.clone().unwrap_or_default();
        if stored.is_deleting() && requested.iter().any(|f| !current.contains(f)) {
            return Err(ClusterError::InvalidObject(format!(
                "VirtualIP {}/{}: no new finalizers can be added if the object is being deleted",
                key.0, key.1
            )));
        }

        stored.metadata.finalizers = Some(requested.clone());
        stored.spec = virtual_ip.spec.clone();
        state.bump(&mut stored.metadata);
        if stored.is_deleting() && requested.is_empty() {
            state.virtual_ips.remove(&key);
        } else {
            state.virtual_ips.insert(key, stored.clone());
        }
        Ok(stored)
    }

    async fn update_virtual_ip_status(&self, virtual_ip: &VirtualIP) -> Result<VirtualIP, ClusterError> {
        let mut state = self.state();
        state.record(MockOperation::UpdateVirtualIpStatus)?;
        let key = namespaced_key(&virtual_ip.metadata)?;
        let mut stored = state
            .virtual_ips
            .get(&key)
            .cloned()
            .ok_or_else(|| ClusterError::NotFound(format!("VirtualIP {}/{}", key.0, key.1)))?;
        stored.status.clone_from(&virtual_ip.status);
        state.bump(&mut stored.metadata);
        state.virtual_ips.insert(key, stored.clone());
        Ok(stored)
    }

    async fn list_segment_mappings(&self) -> Result<Vec<GroupSegmentMapping>, ClusterError> {
        let mut state = self.state();
        state.record(MockOperation::ListSegmentMappings)?;
        Ok(state.segment_mappings.clone())
    }

    async fn list_address_claims(&self, label_selector: &str) -> Result<Vec<AddressClaim>, ClusterError> {
        let mut state = self.state();
        state.record(MockOperation::ListAddressClaims)?;
        Ok(state
            .address_claims
            .values()
            .filter(|claim| selector_matches(label_selector, claim.metadata.labels.as_ref()))
            .cloned()
            .collect())
    }

    async fn create_address_claim(&self, claim: &AddressClaim) -> Result<AddressClaim, ClusterError> {
        let mut state = self.state();
        state.record(MockOperation::CreateAddressClaim)?;
        let name = claim
            .metadata
            .name
            .clone()
            .ok_or_else(|| ClusterError::InvalidObject("IP name is missing".to_string()))?;
        if state.address_claims.contains_key(&name) {
            return Err(ClusterError::AlreadyExists(format!("IP {name}")));
        }
        let mut created = claim.clone();
        state.admit(&mut created.metadata)?;
        state.address_claims.insert(name, created.clone());
        Ok(created)
    }

    async fn create_or_update_address_claim(
        &self,
        claim: &AddressClaim,
        mutate: Mutation<'_, AddressClaim>,
    ) -> Result<AddressClaim, ClusterError> {
        let mut state = self.state();
        state.record(MockOperation::CreateOrUpdateAddressClaim)?;
        let name = claim
            .metadata
            .name
            .clone()
            .ok_or_else(|| ClusterError::InvalidObject("IP name is missing".to_string()))?;
        if let Some(existing) = state.address_claims.get(&name) {
            let mut updated = existing.clone();
            mutate(&mut updated);
            if updated != *existing {
                state.bump(&mut updated.metadata);
                state.address_claims.insert(name, updated.clone());
            }
            return Ok(updated);
        }
        let mut created = claim.clone();
        mutate(&mut created);
        state.admit(&mut created.metadata)?;
        state.address_claims.insert(name, created.clone());
        Ok(created)
    }

    async fn delete_address_claim(&self, name: &str) -> Result<(), ClusterError> {
        let mut state = self.state();
        state.record(MockOperation::DeleteAddressClaim)?;
        state
            .address_claims
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| ClusterError::NotFound(format!("IP {name}")))
    }

    async fn get_service(&self, namespace: &str, name: &str) -> Result<Service, ClusterError> {
        let mut state = self.state();
        state.record(MockOperation::GetService)?;
        state
            .services
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| ClusterError::NotFound(format!("Service {namespace}/{name}")))
    }

    async fn create_or_update_service(
        &self,
        service: &Service,
        mutate: Mutation<'_, Service>,
    ) -> Result<Service, ClusterError> {
        let mut state = self.state();
        state.record(MockOperation::CreateOrUpdateService)?;
        let key = namespaced_key(&service.metadata)?;
        if let Some(existing) = state.services.get(&key) {
            let mut updated = existing.clone();
            mutate(&mut updated);
            if updated != *existing {
                state.bump(&mut updated.metadata);
                state.services.insert(key, updated.clone());
            }
            return Ok(updated);
        }
        let mut created = service.clone();
        mutate(&mut created);
        state.admit_service(&mut created)?;
        state.services.insert(key, created.clone());
        Ok(created)
    }
}
