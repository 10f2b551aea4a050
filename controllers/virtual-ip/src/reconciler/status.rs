//! Status reporting.

use super::Reconciler;
use crate::error::{ControllerError, ResultExt};
use crds::{VirtualIP, VirtualIPStatus};
use tracing::debug;

impl Reconciler {
    /// Persists `status` as the new status of `virtual_ip`.
    ///
    /// Nothing is written while the object is being deleted, or when `status`
    /// equals what is already stored. Returns whether a write happened.
    pub(crate) async fn report_status(
        &self,
        virtual_ip: &VirtualIP,
        status: VirtualIPStatus,
    ) -> Result<bool, ControllerError> {
        if virtual_ip.is_deleting() {
            debug!("VirtualIP {} is being deleted, not updating status", virtual_ip.key());
            return Ok(false);
        }
        if virtual_ip.status.clone().unwrap_or_default() == status {
            debug!("VirtualIP {} status unchanged", virtual_ip.key());
            return Ok(false);
        }

        let mut updated = virtual_ip.clone();
        updated.status = Some(status);
        self.client
            .update_virtual_ip_status(&updated)
            .await
            .context("failed to update VirtualIP status")?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use crate::test_utils::{create_test_virtual_ip, test_reconciler};
    use cluster_client::{MockClusterClient, MockOperation};
    use crds::{VirtualIPState, VirtualIPStatus};

    fn valid_status() -> VirtualIPStatus {
        VirtualIPStatus {
            state: Some(VirtualIPState::Valid),
            message: Some("successfully allocated an IP address".to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_writes_changed_status() {
        let mock = MockClusterClient::new();
        let vip = mock.add_virtual_ip(create_test_virtual_ip("vip", "apps", "web", "", false));
        let reconciler = test_reconciler(mock.clone());

        assert!(reconciler.report_status(&vip, valid_status()).await.unwrap());

        let stored = mock.virtual_ip("apps", "vip").unwrap();
        assert_eq!(stored.status, Some(valid_status()));
    }

    #[tokio::test]
    async fn test_skips_unchanged_status() {
        let mock = MockClusterClient::new();
        let mut vip = create_test_virtual_ip("vip", "apps", "web", "", false);
        vip.status = Some(valid_status());
        let vip = mock.add_virtual_ip(vip);
        let reconciler = test_reconciler(mock.clone());

        assert!(!reconciler.report_status(&vip, valid_status()).await.unwrap());
        assert_eq!(mock.call_count(MockOperation::UpdateVirtualIpStatus), 0);
    }

    #[tokio::test]
    async fn test_skips_while_deleting() {
        let mock = MockClusterClient::new();
        let mut vip = create_test_virtual_ip("vip", "apps", "web", "", false);
        vip.metadata.finalizers = Some(vec!["keep".to_string()]);
        mock.add_virtual_ip(vip);
        mock.request_virtual_ip_deletion("apps", "vip");
        let vip = mock.virtual_ip("apps", "vip").unwrap();
        let reconciler = test_reconciler(mock.clone());

        assert!(!reconciler.report_status(&vip, valid_status()).await.unwrap());
        assert_eq!(mock.call_count(MockOperation::UpdateVirtualIpStatus), 0);
    }

    #[tokio::test]
    async fn test_write_failure_is_escalated() {
        let mock = MockClusterClient::new();
        let vip = mock.add_virtual_ip(create_test_virtual_ip("vip", "apps", "web", "", false));
        mock.fail_next(MockOperation::UpdateVirtualIpStatus);
        let reconciler = test_reconciler(mock);

        let err = reconciler.report_status(&vip, valid_status()).await.unwrap_err();
        assert!(err.to_string().starts_with("failed to update VirtualIP status"));
    }
}
