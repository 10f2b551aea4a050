//! ClusterClient trait for mocking
//!
//! This trait abstracts the object-store operations the VirtualIP controller
//! needs. The concrete `ClusterClient` talks to the API server, and tests use
//! `MockClusterClient`.

use crate::error::ClusterError;
use crds::{AddressClaim, GroupSegmentMapping, VirtualIP};
use k8s_openapi::api::core::v1::Service;

/// Mutation applied by `create_or_update_*` to the fetched (or freshly built) object.
pub type Mutation<'a, K> = &'a (dyn Fn(&mut K) + Send + Sync);

/// Trait for Kubernetes object-store operations
///
/// All async methods must be `Send` to work with Tokio's work-stealing runtime.
/// `IP` and `GroupSegmentMapping` objects are cluster-scoped; `VirtualIP` and
/// `Service` objects are namespaced.
#[async_trait::async_trait]
pub trait ClusterClientTrait: Send + Sync {
    // VirtualIP Operations
    async fn get_virtual_ip(&self, namespace: &str, name: &str) -> Result<VirtualIP, ClusterError>;

    /// Writes metadata (finalizers) guarded by the object's resourceVersion.
    async fn update_virtual_ip(&self, virtual_ip: &VirtualIP) -> Result<VirtualIP, ClusterError>;

    /// Writes the status subresource.
    async fn update_virtual_ip_status(&self, virtual_ip: &VirtualIP) -> Result<VirtualIP, ClusterError>;

    // GroupSegmentMapping Operations
    /// Lists all segment mappings in the store's listing order.
    async fn list_segment_mappings(&self) -> Result<Vec<GroupSegmentMapping>, ClusterError>;

    // IP Operations
    /// Lists `IP` objects matching an equality label selector (`key=value[,key=value]`).
    async fn list_address_claims(&self, label_selector: &str) -> Result<Vec<AddressClaim>, ClusterError>;

    /// Creates an `IP` object; fails with `AlreadyExists` if the name is taken.
    async fn create_address_claim(&self, claim: &AddressClaim) -> Result<AddressClaim, ClusterError>;

    async fn create_or_update_address_claim(
        &self,
        claim: &AddressClaim,
        mutate: Mutation<'_, AddressClaim>,
    ) -> Result<AddressClaim, ClusterError>;

    async fn delete_address_claim(&self, name: &str) -> Result<(), ClusterError>;

    // Service Operations
    async fn get_service(&self, namespace: &str, name: &str) -> Result<Service, ClusterError>;

    async fn create_or_update_service(
        &self,
        service: &Service,
        mutate: Mutation<'_, Service>,
    ) -> Result<Service, ClusterError>;
}
