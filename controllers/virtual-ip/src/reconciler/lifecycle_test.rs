//! Unit tests for the VirtualIP lifecycle

#[cfg(test)]
mod tests {
    use crate::error::ControllerError;
    use crate::reconciler::exposure::KEEPALIVED_GROUP_ANNOTATION;
    use crate::reconciler::{ReconcileOutcome, Reconciler, Transition};
    use crate::test_utils::*;
    use cluster_client::{ClusterError, MockClusterClient, MockOperation};
    use crds::{ADDRESS_FINALIZER, SERVICE_FINALIZER, VirtualIP, VirtualIPState};
    use k8s_openapi::api::core::v1::Service;
    use std::sync::Arc;

    const NS: &str = "apps";

    /// Mock with one /30 mapping, Service `web` and VirtualIP `vip` exposing it.
    fn setup(clone: bool) -> (MockClusterClient, Reconciler) {
        let mock = MockClusterClient::new();
        mock.add_segment_mapping(create_test_segment_mapping("pool-a", "10.0.0.0/30", &[], "edge"));
        mock.add_service(create_test_service("web", NS));
        mock.add_virtual_ip(create_test_virtual_ip("vip", NS, "web", "", clone));
        let reconciler = test_reconciler(mock.clone());
        (mock, reconciler)
    }

    async fn reconcile(reconciler: &Reconciler) -> ReconcileOutcome {
        reconciler.reconcile_virtual_ip(NS, "vip").await.unwrap()
    }

    async fn drive_to_valid(reconciler: &Reconciler) -> Vec<Transition> {
        let mut transitions = Vec::new();
        for _ in 0..10 {
            match reconcile(reconciler).await {
                ReconcileOutcome::Transitioned(Transition::Valid) => {
                    transitions.push(Transition::Valid);
                    return transitions;
                }
                ReconcileOutcome::Transitioned(transition) => transitions.push(transition),
                other => panic!("unexpected outcome {other:?} after {transitions:?}"),
            }
        }
        panic!("VirtualIP did not become valid: {transitions:?}");
    }

    fn stored_vip(mock: &MockClusterClient) -> VirtualIP {
        mock.virtual_ip(NS, "vip").unwrap()
    }

    fn finalizers(mock: &MockClusterClient) -> Vec<String> {
        stored_vip(mock).metadata.finalizers.unwrap_or_default()
    }

    fn external_ips(service: &Service) -> Option<Vec<String>> {
        service.spec.as_ref().and_then(|spec| spec.external_ips.clone())
    }

    fn group_annotation(service: &Service) -> Option<String> {
        service
            .metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(KEEPALIVED_GROUP_ANNOTATION))
            .cloned()
    }

    #[tokio::test]
    async fn test_full_progression_to_valid() {
        let (mock, reconciler) = setup(false);

        assert_eq!(
            reconcile(&reconciler).await,
            ReconcileOutcome::Transitioned(Transition::AddressAllocated)
        );
        let status = stored_vip(&mock).status.unwrap();
        assert_eq!(status.ip.as_deref(), Some("10.0.0.0"));
        assert_eq!(status.gsm.as_deref(), Some("pool-a"));
        assert_eq!(status.keepalived_group.as_deref(), Some("edge"));
        assert_eq!(status.state, Some(VirtualIPState::CreatingIp));
        assert_eq!(status.message.as_deref(), Some("creating IP object for the service"));
        let claim = mock.address_claim("10.0.0.0").unwrap();
        assert_eq!(claim.segment_mapping(), Some("pool-a"));
        assert_eq!(claim.owner(), Some("apps/vip"));

        assert_eq!(
            reconcile(&reconciler).await,
            ReconcileOutcome::Transitioned(Transition::AddressGuarded)
        );
        assert_eq!(finalizers(&mock), vec![ADDRESS_FINALIZER]);

        assert_eq!(
            reconcile(&reconciler).await,
            ReconcileOutcome::Transitioned(Transition::ExposureRecorded)
        );
        let status = stored_vip(&mock).status.unwrap();
        assert_eq!(status.service.as_deref(), Some("web"));
        assert_eq!(status.clone, Some(false));
        assert_eq!(status.state, Some(VirtualIPState::Exposing));
        assert_eq!(status.message.as_deref(), Some("exposing service with an external IP"));

        assert_eq!(
            reconcile(&reconciler).await,
            ReconcileOutcome::Transitioned(Transition::ServiceBound)
        );
        assert_eq!(finalizers(&mock), vec![ADDRESS_FINALIZER, SERVICE_FINALIZER]);
        let service = mock.service(NS, "web").unwrap();
        assert_eq!(external_ips(&service), Some(vec!["10.0.0.0".to_string()]));
        assert_eq!(group_annotation(&service).as_deref(), Some("keepalived-operator/edge"));

        assert_eq!(reconcile(&reconciler).await, ReconcileOutcome::Transitioned(Transition::Valid));
        let status = stored_vip(&mock).status.unwrap();
        assert_eq!(status.state, Some(VirtualIPState::Valid));
        assert_eq!(status.message.as_deref(), Some("successfully allocated an IP address"));
    }

    #[tokio::test]
    async fn test_valid_reconcile_is_idempotent() {
        let (mock, reconciler) = setup(false);
        drive_to_valid(&reconciler).await;

        let before = stored_vip(&mock);
        let service_before = mock.service(NS, "web").unwrap();
        let writes = [
            MockOperation::UpdateVirtualIp,
            MockOperation::UpdateVirtualIpStatus,
            MockOperation::CreateAddressClaim,
        ]
        .map(|op| mock.call_count(op));

        for _ in 0..2 {
            assert_eq!(reconcile(&reconciler).await, ReconcileOutcome::Transitioned(Transition::Valid));
        }

        assert_eq!(stored_vip(&mock), before);
        assert_eq!(mock.service(NS, "web").unwrap(), service_before);
        assert_eq!(mock.address_claims().len(), 1);
        let writes_after = [
            MockOperation::UpdateVirtualIp,
            MockOperation::UpdateVirtualIpStatus,
            MockOperation::CreateAddressClaim,
        ]
        .map(|op| mock.call_count(op));
        assert_eq!(writes_after, writes);
    }

    #[tokio::test]
    async fn test_deletion_releases_address_before_service() {
        let (mock, reconciler) = setup(false);
        drive_to_valid(&reconciler).await;
        mock.request_virtual_ip_deletion(NS, "vip");

        assert_eq!(
            reconcile(&reconciler).await,
            ReconcileOutcome::Transitioned(Transition::AddressReleased)
        );
        assert!(mock.address_claim("10.0.0.0").is_none());
        assert_eq!(finalizers(&mock), vec![SERVICE_FINALIZER]);

        assert_eq!(
            reconcile(&reconciler).await,
            ReconcileOutcome::Transitioned(Transition::ServiceReleased)
        );
        let service = mock.service(NS, "web").unwrap();
        assert_eq!(external_ips(&service), None);
        assert_eq!(group_annotation(&service), None);
        assert!(mock.virtual_ip(NS, "vip").is_none());

        assert_eq!(reconcile(&reconciler).await, ReconcileOutcome::Absent);
    }

    #[tokio::test]
    async fn test_deletion_resumes_after_crash_between_steps() {
        let (mock, reconciler) = setup(false);
        drive_to_valid(&reconciler).await;
        mock.request_virtual_ip_deletion(NS, "vip");

        // IP object deleted, finalizer write lost
        mock.fail_next(MockOperation::UpdateVirtualIp);
        let outcome = reconcile(&reconciler).await;
        assert!(matches!(outcome, ReconcileOutcome::Failed(ref m) if m.starts_with("could not remove finalizer for IP object")));
        assert!(mock.address_claim("10.0.0.0").is_none());
        assert_eq!(finalizers(&mock), vec![ADDRESS_FINALIZER, SERVICE_FINALIZER]);

        assert_eq!(
            reconcile(&reconciler).await,
            ReconcileOutcome::Transitioned(Transition::AddressReleased)
        );
        assert_eq!(
            reconcile(&reconciler).await,
            ReconcileOutcome::Transitioned(Transition::ServiceReleased)
        );
        assert!(mock.virtual_ip(NS, "vip").is_none());
    }

    #[tokio::test]
    async fn test_status_is_not_written_while_deleting() {
        let (mock, reconciler) = setup(false);
        drive_to_valid(&reconciler).await;
        mock.request_virtual_ip_deletion(NS, "vip");
        let status_writes = mock.call_count(MockOperation::UpdateVirtualIpStatus);

        mock.fail_next(MockOperation::DeleteAddressClaim);
        assert!(matches!(reconcile(&reconciler).await, ReconcileOutcome::Failed(_)));
        reconcile(&reconciler).await;
        reconcile(&reconciler).await;

        assert_eq!(mock.call_count(MockOperation::UpdateVirtualIpStatus), status_writes);
    }

    #[tokio::test]
    async fn test_clone_mode_leaves_original_untouched() {
        let (mock, reconciler) = setup(true);
        let original = mock.service(NS, "web").unwrap();

        drive_to_valid(&reconciler).await;

        assert_eq!(mock.service(NS, "web").unwrap(), original);
        let clone = mock.service(NS, "web-keepalived-clone").unwrap();
        assert_eq!(external_ips(&clone), Some(vec!["10.0.0.0".to_string()]));
        assert_eq!(group_annotation(&clone).as_deref(), Some("keepalived-operator/edge"));
        let owners = clone.metadata.owner_references.unwrap();
        assert_eq!(owners.len(), 1);
        assert_eq!(owners[0].kind, "VirtualIP");
        assert_eq!(Some(&owners[0].uid), stored_vip(&mock).metadata.uid.as_ref());
        assert_ne!(
            clone.spec.and_then(|s| s.cluster_ip),
            original.spec.and_then(|s| s.cluster_ip)
        );
    }

    #[tokio::test]
    async fn test_deleted_clone_is_recreated() {
        let (mock, reconciler) = setup(true);
        drive_to_valid(&reconciler).await;

        mock.delete_service(NS, "web-keepalived-clone");
        assert_eq!(reconcile(&reconciler).await, ReconcileOutcome::Transitioned(Transition::Valid));

        let clone = mock.service(NS, "web-keepalived-clone").unwrap();
        assert_eq!(external_ips(&clone), Some(vec!["10.0.0.0".to_string()]));
    }

    #[tokio::test]
    async fn test_clone_deletion_does_not_touch_services() {
        let (mock, reconciler) = setup(true);
        drive_to_valid(&reconciler).await;
        mock.request_virtual_ip_deletion(NS, "vip");
        let service_calls = mock.call_count(MockOperation::CreateOrUpdateService);
        let gets = mock.call_count(MockOperation::GetService);

        assert_eq!(
            reconcile(&reconciler).await,
            ReconcileOutcome::Transitioned(Transition::AddressReleased)
        );
        assert_eq!(
            reconcile(&reconciler).await,
            ReconcileOutcome::Transitioned(Transition::ServiceReleased)
        );

        assert_eq!(mock.call_count(MockOperation::CreateOrUpdateService), service_calls);
        assert_eq!(mock.call_count(MockOperation::GetService), gets);
        assert!(mock.virtual_ip(NS, "vip").is_none());
    }

    #[tokio::test]
    async fn test_clone_flag_is_committed_at_exposure() {
        let (mock, reconciler) = setup(false);
        drive_to_valid(&reconciler).await;

        // Flipping spec.clone after exposure does not move the binding
        let mut vip = stored_vip(&mock);
        vip.spec.clone = true;
        reconciler.client.update_virtual_ip(&vip).await.unwrap();

        assert_eq!(reconcile(&reconciler).await, ReconcileOutcome::Transitioned(Transition::Valid));
        assert!(mock.service(NS, "web-keepalived-clone").is_none());
    }

    #[tokio::test]
    async fn test_pool_exhausted_is_recorded_in_status() {
        let mock = MockClusterClient::new();
        mock.add_segment_mapping(create_test_segment_mapping("pool-a", "10.0.0.0/32", &[], "edge"));
        mock.claim_address("10.0.0.0", "pool-a");
        mock.add_service(create_test_service("web", NS));
        mock.add_virtual_ip(create_test_virtual_ip("vip", NS, "web", "10.0.0.0/32", false));
        let reconciler = test_reconciler(mock.clone());

        let outcome = reconcile(&reconciler).await;

        let expected = "could not allocate an IP: there are no available IPs in GroupSegmentMapping pool-a";
        assert_eq!(outcome, ReconcileOutcome::Failed(expected.to_string()));
        let status = stored_vip(&mock).status.unwrap();
        assert_eq!(status.state, Some(VirtualIPState::Error));
        assert_eq!(status.message.as_deref(), Some(expected));
        assert_eq!(status.ip, None);
        assert!(finalizers(&mock).is_empty());
    }

    #[tokio::test]
    async fn test_any_segment_falls_through_exhausted_mapping() {
        let mock = MockClusterClient::new();
        mock.add_segment_mapping(create_test_segment_mapping("a", "10.0.0.0/32", &[], "group-a"));
        mock.add_segment_mapping(create_test_segment_mapping("b", "10.1.0.0/31", &["10.1.0.0"], "group-b"));
        mock.claim_address("10.0.0.0", "a");
        mock.add_service(create_test_service("web", NS));
        mock.add_virtual_ip(create_test_virtual_ip("vip", NS, "web", "", false));
        let reconciler = test_reconciler(mock.clone());

        assert_eq!(
            reconcile(&reconciler).await,
            ReconcileOutcome::Transitioned(Transition::AddressAllocated)
        );

        let status = stored_vip(&mock).status.unwrap();
        assert_eq!(status.ip.as_deref(), Some("10.1.0.1"));
        assert_eq!(status.gsm.as_deref(), Some("b"));
        assert_eq!(status.keepalived_group.as_deref(), Some("group-b"));
    }

    #[tokio::test]
    async fn test_malformed_segment_is_recorded_in_status() {
        let mock = MockClusterClient::new();
        mock.add_segment_mapping(create_test_segment_mapping("pool-a", "10.0.0.0/33", &[], "edge"));
        mock.add_virtual_ip(create_test_virtual_ip("vip", NS, "web", "10.0.0.0/33", false));
        let reconciler = test_reconciler(mock.clone());

        let outcome = reconcile(&reconciler).await;

        assert!(matches!(outcome, ReconcileOutcome::Failed(ref m) if m.contains("invalid segment")));
        assert_eq!(stored_vip(&mock).status.unwrap().state, Some(VirtualIPState::Error));
        assert!(mock.address_claims().is_empty());
    }

    #[tokio::test]
    async fn test_missing_service_fails_then_recovers() {
        let mock = MockClusterClient::new();
        mock.add_segment_mapping(create_test_segment_mapping("pool-a", "10.0.0.0/30", &[], "edge"));
        mock.add_virtual_ip(create_test_virtual_ip("vip", NS, "web", "", false));
        let reconciler = test_reconciler(mock.clone());

        for expected in [
            Transition::AddressAllocated,
            Transition::AddressGuarded,
            Transition::ExposureRecorded,
        ] {
            assert_eq!(reconcile(&reconciler).await, ReconcileOutcome::Transitioned(expected));
        }

        let outcome = reconcile(&reconciler).await;
        assert_eq!(
            outcome,
            ReconcileOutcome::Failed("could not get service to be exposed: Service not found: apps/web".to_string())
        );
        assert_eq!(stored_vip(&mock).status.unwrap().state, Some(VirtualIPState::Error));

        mock.add_service(create_test_service("web", NS));
        assert_eq!(
            reconcile(&reconciler).await,
            ReconcileOutcome::Transitioned(Transition::ServiceBound)
        );
        assert_eq!(reconcile(&reconciler).await, ReconcileOutcome::Transitioned(Transition::Valid));
    }

    #[tokio::test]
    async fn test_teardown_tolerates_missing_service() {
        let (mock, reconciler) = setup(false);
        drive_to_valid(&reconciler).await;
        mock.delete_service(NS, "web");
        mock.request_virtual_ip_deletion(NS, "vip");

        assert_eq!(
            reconcile(&reconciler).await,
            ReconcileOutcome::Transitioned(Transition::AddressReleased)
        );
        assert_eq!(
            reconcile(&reconciler).await,
            ReconcileOutcome::Transitioned(Transition::ServiceReleased)
        );
        assert!(mock.virtual_ip(NS, "vip").is_none());
    }

    #[tokio::test]
    async fn test_deleting_before_exposure_releases_address_only() {
        let (mock, reconciler) = setup(false);
        reconcile(&reconciler).await;
        reconcile(&reconciler).await;
        assert_eq!(finalizers(&mock), vec![ADDRESS_FINALIZER]);

        mock.request_virtual_ip_deletion(NS, "vip");
        assert_eq!(
            reconcile(&reconciler).await,
            ReconcileOutcome::Transitioned(Transition::AddressReleased)
        );

        assert!(mock.address_claims().is_empty());
        assert!(mock.virtual_ip(NS, "vip").is_none());
        assert_eq!(mock.call_count(MockOperation::GetService), 0);
    }

    #[tokio::test]
    async fn test_empty_service_is_a_validation_error() {
        let mock = MockClusterClient::new();
        mock.add_segment_mapping(create_test_segment_mapping("pool-a", "10.0.0.0/30", &[], "edge"));
        mock.add_virtual_ip(create_test_virtual_ip("vip", NS, "", "", false));
        let reconciler = test_reconciler(mock.clone());

        let outcome = reconcile(&reconciler).await;

        assert!(matches!(outcome, ReconcileOutcome::Failed(ref m) if m.contains("spec.service")));
        assert!(mock.address_claims().is_empty());
    }

    #[tokio::test]
    async fn test_absent_virtual_ip_is_absorbed() {
        let reconciler = test_reconciler(MockClusterClient::new());
        assert_eq!(
            reconciler.reconcile_virtual_ip(NS, "ghost").await.unwrap(),
            ReconcileOutcome::Absent
        );
    }

    #[tokio::test]
    async fn test_read_failure_is_escalated() {
        let (mock, reconciler) = setup(false);
        mock.fail_next(MockOperation::GetVirtualIp);

        let err = reconciler.reconcile_virtual_ip(NS, "vip").await.unwrap_err();
        assert!(matches!(err, ControllerError::Cluster(ClusterError::Unavailable(_))));
    }

    #[tokio::test]
    async fn test_lost_status_write_does_not_leak_an_address() {
        let (mock, reconciler) = setup(false);
        mock.fail_next(MockOperation::UpdateVirtualIpStatus);

        // Address claimed, but recording it failed
        assert!(reconciler.reconcile_virtual_ip(NS, "vip").await.is_err());
        assert_eq!(mock.address_claims().len(), 1);

        assert_eq!(
            reconcile(&reconciler).await,
            ReconcileOutcome::Transitioned(Transition::AddressAllocated)
        );
        assert_eq!(mock.address_claims().len(), 1);
        assert_eq!(stored_vip(&mock).status.unwrap().ip.as_deref(), Some("10.0.0.0"));
    }

    #[tokio::test]
    async fn test_ip_object_labels_are_resynced() {
        let (mock, reconciler) = setup(false);
        drive_to_valid(&reconciler).await;

        // Someone deleted the IP object out of band
        reconciler.client.delete_address_claim("10.0.0.0").await.unwrap();
        assert_eq!(reconcile(&reconciler).await, ReconcileOutcome::Transitioned(Transition::Valid));

        let claim = mock.address_claim("10.0.0.0").unwrap();
        assert_eq!(claim.segment_mapping(), Some("pool-a"));
        assert_eq!(claim.owner(), Some("apps/vip"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_virtual_ips_get_distinct_addresses() {
        let mock = MockClusterClient::new();
        mock.add_segment_mapping(create_test_segment_mapping("pool-a", "10.0.0.0/30", &[], "edge"));
        for i in 0..6 {
            mock.add_virtual_ip(create_test_virtual_ip(&format!("vip-{i}"), NS, "web", "", false));
        }
        let reconciler = Arc::new(test_reconciler(mock.clone()));

        let tasks: Vec<_> = (0..6)
            .map(|i| {
                let reconciler = Arc::clone(&reconciler);
                tokio::spawn(async move { reconciler.reconcile_virtual_ip(NS, &format!("vip-{i}")).await })
            })
            .collect();

        let mut allocated = 0;
        let mut failed = 0;
        for task in tasks {
            match task.await.unwrap().unwrap() {
                ReconcileOutcome::Transitioned(Transition::AddressAllocated) => allocated += 1,
                ReconcileOutcome::Failed(_) => failed += 1,
                other => panic!("unexpected outcome {other:?}"),
            }
        }
        assert_eq!((allocated, failed), (4, 2));

        let mut addresses: Vec<String> = (0..6)
            .filter_map(|i| mock.virtual_ip(NS, &format!("vip-{i}")))
            .filter_map(|vip| vip.status.and_then(|s| s.ip))
            .collect();
        addresses.sort();
        assert_eq!(addresses, vec!["10.0.0.0", "10.0.0.1", "10.0.0.2", "10.0.0.3"]);
    }
}
