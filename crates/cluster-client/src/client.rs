//! Kubernetes-backed implementation of `ClusterClientTrait`.

use crate::cluster_trait::{ClusterClientTrait, Mutation};
use crate::common::create_or_update;
use crate::error::ClusterError;
use crds::{AddressClaim, GroupSegmentMapping, VirtualIP};
use k8s_openapi::api::core::v1::Service;
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::Client;
use serde_json::json;
use tracing::debug;

/// Object-store client backed by the Kubernetes API server.
#[derive(Clone)]
pub struct ClusterClient {
    client: Client,
}

impl std::fmt::Debug for ClusterClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterClient").finish_non_exhaustive()
    }
}

impl ClusterClient {
    /// Wraps an existing kube client.
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Builds a client from the in-cluster or kubeconfig environment.
    pub async fn try_default() -> Result<Self, ClusterError> {
        Ok(Self::new(Client::try_default().await?))
    }

    /// Underlying kube client, for watchers.
    pub fn kube_client(&self) -> Client {
        self.client.clone()
    }

    fn virtual_ips(&self, namespace: &str) -> Api<VirtualIP> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn address_claims(&self) -> Api<AddressClaim> {
        Api::all(self.client.clone())
    }

    fn services(&self, namespace: &str) -> Api<Service> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

fn required<'a>(value: Option<&'a String>, what: &str) -> Result<&'a str, ClusterError> {
    value
        .map(String::as_str)
        .ok_or_else(|| ClusterError::InvalidObject(format!("{what} is missing")))
}

#[async_trait::async_trait]
impl ClusterClientTrait for ClusterClient {
    async fn get_virtual_ip(&self, namespace: &str, name: &str) -> Result<VirtualIP, ClusterError> {
        self.virtual_ips(namespace)
            .get(name)
            .await
            .map_err(|e| ClusterError::from_kube(e, &format!("VirtualIP {namespace}/{name}")))
    }

    async fn update_virtual_ip(&self, virtual_ip: &VirtualIP) -> Result<VirtualIP, ClusterError> {
        let namespace = required(virtual_ip.metadata.namespace.as_ref(), "VirtualIP namespace")?;
        let name = required(virtual_ip.metadata.name.as_ref(), "VirtualIP name")?;

        // resourceVersion in a merge patch turns it into a compare-and-swap
        let patch = json!({
            "metadata": {
                "finalizers": virtual_ip.metadata.finalizers.clone().unwrap_or_default(),
                "resourceVersion": virtual_ip.metadata.resource_version,
            }
        });
        debug!("Patching VirtualIP {}/{} finalizers", namespace, name);
        self.virtual_ips(namespace)
            .patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| ClusterError::from_kube(e, &format!("VirtualIP {namespace}/{name}")))
    }

    async fn update_virtual_ip_status(&self, virtual_ip: &VirtualIP) -> Result<VirtualIP, ClusterError> {
        let namespace = required(virtual_ip.metadata.namespace.as_ref(), "VirtualIP namespace")?;
        let name = required(virtual_ip.metadata.name.as_ref(), "VirtualIP name")?;

        let patch = json!({ "status": virtual_ip.status });
        self.virtual_ips(namespace)
            .patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| ClusterError::from_kube(e, &format!("VirtualIP {namespace}/{name} status")))
    }

    async fn list_segment_mappings(&self) -> Result<Vec<GroupSegmentMapping>, ClusterError> {
        let api: Api<GroupSegmentMapping> = Api::all(self.client.clone());
        api.list(&ListParams::default())
            .await
            .map(|list| list.items)
            .map_err(|e| ClusterError::from_kube(e, "GroupSegmentMapping list"))
    }

    async fn list_address_claims(&self, label_selector: &str) -> Result<Vec<AddressClaim>, ClusterError> {
        self.address_claims()
            .list(&ListParams::default().labels(label_selector))
            .await
            .map(|list| list.items)
            .map_err(|e| ClusterError::from_kube(e, &format!("IP list ({label_selector})")))
    }

    async fn create_address_claim(&self, claim: &AddressClaim) -> Result<AddressClaim, ClusterError> {
        let name = required(claim.metadata.name.as_ref(), "IP name")?;
        self.address_claims()
            .create(&PostParams::default(), claim)
            .await
            .map_err(|e| ClusterError::from_kube(e, &format!("IP {name}")))
    }

    async fn create_or_update_address_claim(
        &self,
        claim: &AddressClaim,
        mutate: Mutation<'_, AddressClaim>,
    ) -> Result<AddressClaim, ClusterError> {
        create_or_update(&self.address_claims(), claim, mutate, "IP").await
    }

    async fn delete_address_claim(&self, name: &str) -> Result<(), ClusterError> {
        self.address_claims()
            .delete(name, &DeleteParams::default())
            .await
            .map(|_| ())
            .map_err(|e| ClusterError::from_kube(e, &format!("IP {name}")))
    }

    async fn get_service(&self, namespace: &str, name: &str) -> Result<Service, ClusterError> {
        self.services(namespace)
            .get(name)
            .await
            .map_err(|e| ClusterError::from_kube(e, &format!("Service {namespace}/{name}")))
    }

    async fn create_or_update_service(
        &self,
        service: &Service,
        mutate: Mutation<'_, Service>,
    ) -> Result<Service, ClusterError> {
        let namespace = required(service.metadata.namespace.as_ref(), "Service namespace")?;
        create_or_update(&self.services(namespace), service, mutate, "Service").await
    }
}
