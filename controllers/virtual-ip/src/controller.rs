//! Main controller implementation.
//!
//! This module contains the `Controller` struct that wires the cluster client,
//! reconciler, watcher and probes server of the VirtualIP Controller.

use crate::config::ControllerConfig;
use crate::error::ControllerError;
use crate::metrics::Metrics;
use crate::reconciler::Reconciler;
use crate::reconciler::address_pool::PoolPolicy;
use crate::reconciler::exposure::ExposureConfig;
use crate::server::{ProbeState, run_probe_server};
use crate::watcher::{WatchSettings, watch_virtual_ips};
use cluster_client::ClusterClient;
use crds::VirtualIP;
use k8s_openapi::api::core::v1::Service;
use kube::Api;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::task::JoinHandle;
use tracing::info;

/// Main controller for VirtualIP management.
#[derive(Debug)]
pub struct Controller {
    watcher: JoinHandle<Result<(), ControllerError>>,
    probe_server: JoinHandle<anyhow::Result<()>>,
}

impl Controller {
    /// Creates a new controller instance and starts its background tasks.
    pub async fn new(config: ControllerConfig) -> Result<Self, ControllerError> {
        info!("Initializing VirtualIP Controller");

        let cluster_client = ClusterClient::try_default().await?;
        let kube_client = cluster_client.kube_client();

        let metrics = Arc::new(
            Metrics::new().map_err(|e| ControllerError::Server(format!("failed to register metrics: {e}")))?,
        );
        let ready = Arc::new(AtomicBool::new(false));

        let (virtual_ip_api, service_api): (Api<VirtualIP>, Api<Service>) = match config.watch_namespace.as_deref() {
            Some(ns) => (Api::namespaced(kube_client.clone(), ns), Api::namespaced(kube_client, ns)),
            None => (Api::all(kube_client.clone()), Api::all(kube_client)),
        };

        let reconciler = Arc::new(Reconciler::new(
            cluster_client,
            ExposureConfig {
                keepalived_group_namespace: config.keepalived_group_namespace.clone(),
            },
            PoolPolicy {
                exclude_subnet_boundaries: config.exclude_subnet_boundaries,
            },
            Arc::clone(&metrics),
            (config.backoff_min_seconds, config.backoff_max_seconds),
        ));

        let probe_state = ProbeState {
            metrics,
            ready: Arc::clone(&ready),
        };
        let probe_addr = config.probe_addr;
        let probe_server = tokio::spawn(async move { run_probe_server(probe_addr, probe_state).await });

        let settings = WatchSettings {
            debounce: config.debounce,
            concurrency: config.reconcile_concurrency,
        };
        let watcher = tokio::spawn(async move {
            ready.store(true, Ordering::Relaxed);
            let result = watch_virtual_ips(virtual_ip_api, service_api, reconciler, settings).await;
            ready.store(false, Ordering::Relaxed);
            result
        });

        Ok(Self { watcher, probe_server })
    }

    /// Runs the controller until the watcher or the probes server exits.
    pub async fn run(mut self) -> Result<(), ControllerError> {
        info!("VirtualIP Controller running");

        // Both tasks are expected to run forever
        tokio::select! {
            result = &mut self.watcher => {
                result.map_err(|e| ControllerError::Watch(format!("VirtualIP watcher panicked: {}", e)))?
                    .map_err(|e| ControllerError::Watch(format!("VirtualIP watcher error: {}", e)))?;
            }
            result = &mut self.probe_server => {
                result.map_err(|e| ControllerError::Server(format!("probe server panicked: {}", e)))?
                    .map_err(|e| ControllerError::Server(format!("{:#}", e)))?;
            }
        }

        Ok(())
    }
}
