//! VirtualIP watcher.
//!
//! Drives `Reconciler::reconcile_virtual_ip` from a `kube_runtime::Controller`
//! watching VirtualIPs and the Services they own (cloned Services), so that a
//! deleted or modified clone is put back.

use crate::error::ControllerError;
use crate::reconciler::{ReconcileOutcome, Reconciler};
use crds::VirtualIP;
use futures::StreamExt;
use k8s_openapi::api::core::v1::Service;
use kube::Api;
use kube::ResourceExt;
use kube_runtime::controller::{Action, Config as RuntimeConfig};
use kube_runtime::{Controller, watcher};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Watch settings.
#[derive(Debug, Clone, Copy)]
pub struct WatchSettings {
    /// Quiet period after an event before reconciling
    pub debounce: Duration,
    /// Maximum concurrent reconciliations
    pub concurrency: u16,
}

/// Watches VirtualIPs (and owned Services) until the watch stream ends.
pub async fn watch_virtual_ips(
    virtual_ips: Api<VirtualIP>,
    services: Api<Service>,
    reconciler: Arc<Reconciler>,
    settings: WatchSettings,
) -> Result<(), ControllerError> {
    info!(
        "Starting VirtualIP watcher (debounce {:?}, concurrency {})",
        settings.debounce, settings.concurrency
    );

    let config = RuntimeConfig::default()
        .debounce(settings.debounce)
        .concurrency(settings.concurrency);

    Controller::new(virtual_ips, watcher::Config::default())
        .owns(services, watcher::Config::default())
        .with_config(config)
        .run(reconcile, error_policy, reconciler)
        .for_each(|res| async move {
            match res {
                Ok((obj, _)) => debug!("Reconciled VirtualIP {}", obj),
                Err(e) => warn!("VirtualIP controller error: {}", e),
            }
        })
        .await;

    info!("VirtualIP watcher stopped");
    Ok(())
}

async fn reconcile(virtual_ip: Arc<VirtualIP>, reconciler: Arc<Reconciler>) -> Result<Action, ControllerError> {
    let namespace = virtual_ip.namespace().unwrap_or_default();
    let name = virtual_ip.name_any();
    let outcome = reconciler.reconcile_virtual_ip(&namespace, &name).await?;
    Ok(next_action(&reconciler, &virtual_ip.key(), &outcome))
}

/// Errors that escaped the status path (read or status write failures).
fn error_policy(virtual_ip: Arc<VirtualIP>, error: &ControllerError, reconciler: Arc<Reconciler>) -> Action {
    let key = virtual_ip.key();
    error!("Reconciliation error for VirtualIP {}: {}", key, error);
    reconciler.metrics.record_reconciliation("error");
    requeue_with_backoff(&reconciler, &key)
}

/// Maps a reconciliation outcome to the controller action.
///
/// Progress waits for the resulting watch event; failures are retried with
/// per-object Fibonacci backoff.
fn next_action(reconciler: &Reconciler, key: &str, outcome: &ReconcileOutcome) -> Action {
    match outcome {
        ReconcileOutcome::Failed(_) => requeue_with_backoff(reconciler, key),
        ReconcileOutcome::Absent => {
            reconciler.forget_resource(key);
            Action::await_change()
        }
        ReconcileOutcome::Transitioned(_) => {
            reconciler.reset_error(key);
            Action::await_change()
        }
    }
}

fn requeue_with_backoff(reconciler: &Reconciler, key: &str) -> Action {
    reconciler.increment_error(key);
    let (backoff_seconds, error_count) = reconciler.get_backoff_for_resource(key);
    warn!(
        "VirtualIP {} failed {} time(s) in a row, retrying in {}s",
        key, error_count, backoff_seconds
    );
    Action::requeue(Duration::from_secs(backoff_seconds))
}
