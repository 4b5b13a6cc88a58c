//! Unit tests for IP address claims

#[cfg(test)]
mod tests {
    use crate::error::ControllerError;
    use crate::reconciler::ipam::{claim_name, netmask_from_prefix, AddressState};
    use crate::reconciler::scope::MachineScope;
    use crate::test_utils::*;
    use crds::*;
    use infra_client::{InfraClientTrait, MockInfraClient};
    use kube::ResourceExt;

    fn scope(machine_name: &str) -> MachineScope {
        MachineScope {
            machine: create_test_machine(machine_name, "default"),
            cluster_name: TEST_CLUSTER.to_string(),
            bootstrap_data: "#cloud-config\n".to_string(),
            tinkerbell_cluster: None,
        }
    }

    fn ipam_machine(name: &str) -> TinkerbellMachine {
        let mut machine = create_test_tinkerbell_machine(name, "default");
        machine.spec.ipam_pool_ref = Some(test_pool_ref());
        machine
    }

    #[test]
    fn test_netmask_from_prefix() {
        assert_eq!(netmask_from_prefix(24), "255.255.255.0");
        assert_eq!(netmask_from_prefix(16), "255.255.0.0");
        assert_eq!(netmask_from_prefix(32), "255.255.255.255");
        assert_eq!(netmask_from_prefix(1), "128.0.0.0");
        assert_eq!(netmask_from_prefix(0), "0.0.0.0");
        assert_eq!(netmask_from_prefix(33), "");
        assert_eq!(netmask_from_prefix(-1), "");
    }

    #[test]
    fn test_claim_name() {
        assert_eq!(claim_name("m1", 0), "m1-0");
    }

    #[tokio::test]
    async fn test_without_pool_is_ready_without_writes() {
        let mock = MockInfraClient::new();
        let reconciler = create_test_reconciler(&mock);
        let machine = create_test_tinkerbell_machine("m1", "default");
        let hw = create_test_hardware("hw-0", "default", "aa:bb:cc:dd:ee:00", Some("10.0.0.10"));

        let state = reconciler.reconcile_ip_address(&machine, &scope("m1"), hw).await.unwrap();
        assert!(matches!(state, AddressState::Ready(_)));
        assert_eq!(mock.write_count(), 0);
    }

    #[tokio::test]
    async fn test_static_address_skips_claim() {
        let mock = MockInfraClient::new();
        let reconciler = create_test_reconciler(&mock);
        let hw = create_test_hardware("hw-0", "default", "aa:bb:cc:dd:ee:00", Some("10.0.0.10"));

        let state = reconciler
            .reconcile_ip_address(&ipam_machine("m1"), &scope("m1"), hw)
            .await
            .unwrap();
        assert!(matches!(state, AddressState::Ready(_)));
        assert!(mock.get_ip_address_claim("default", "m1-0").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_claim_flow_assigns_granted_address() {
        let mock = MockInfraClient::new();
        let reconciler = create_test_reconciler(&mock);
        let machine = ipam_machine("m1");
        mock.add_hardware(create_test_hardware("hw-0", "default", "aa:bb:cc:dd:ee:00", None));
        let hw = mock.get_hardware("default", "hw-0").await.unwrap().unwrap();

        // First pass creates the claim and waits
        let state = reconciler
            .reconcile_ip_address(&machine, &scope("m1"), hw.clone())
            .await
            .unwrap();
        assert!(matches!(state, AddressState::Pending));

        let claim = mock.get_ip_address_claim("default", "m1-0").await.unwrap().unwrap();
        assert_eq!(claim.spec.pool_ref, test_pool_ref());
        assert_eq!(claim.labels().get(CLUSTER_NAME_LABEL).map(String::as_str), Some(TEST_CLUSTER));
        assert!(claim.finalizers().contains(&IP_CLAIM_FINALIZER.to_string()));
        assert_eq!(claim.owner_references()[0].kind, "TinkerbellMachine");

        // Not granted yet
        let state = reconciler
            .reconcile_ip_address(&machine, &scope("m1"), hw.clone())
            .await
            .unwrap();
        assert!(matches!(state, AddressState::Pending));

        // Granted, but the address object is not visible yet
        mock.grant_ip_address_claim("default", "m1-0", "m1-0-address");
        let state = reconciler
            .reconcile_ip_address(&machine, &scope("m1"), hw.clone())
            .await
            .unwrap();
        assert!(matches!(state, AddressState::Pending));

        mock.add_ip_address(create_test_ip_address("m1-0-address", "default", "10.1.0.20", 24));
        let state = reconciler
            .reconcile_ip_address(&machine, &scope("m1"), hw)
            .await
            .unwrap();
        let AddressState::Ready(updated) = state else {
            panic!("expected the address to be assigned");
        };
        let ip = updated.primary_dhcp().and_then(|d| d.ip.clone()).unwrap();
        assert_eq!(ip.address, "10.1.0.20");
        assert_eq!(ip.netmask.as_deref(), Some("255.255.255.0"));
        assert_eq!(ip.gateway.as_deref(), Some("10.1.0.1"));

        let stored = mock.get_hardware("default", "hw-0").await.unwrap().unwrap();
        assert_eq!(stored.primary_address(), Some("10.1.0.20"));
    }

    #[tokio::test]
    async fn test_assigned_address_keeps_inventory_fields() {
        let mock = MockInfraClient::new();
        let reconciler = create_test_reconciler(&mock);
        let machine = ipam_machine("m1");
        mock.add_hardware(with_inventory_fields(create_test_hardware(
            "hw-0",
            "default",
            "aa:bb:cc:dd:ee:00",
            None,
        )));
        let hw = mock.get_hardware("default", "hw-0").await.unwrap().unwrap();

        reconciler
            .reconcile_ip_address(&machine, &scope("m1"), hw.clone())
            .await
            .unwrap();
        mock.grant_ip_address_claim("default", "m1-0", "m1-0-address");
        mock.add_ip_address(create_test_ip_address("m1-0-address", "default", "10.1.0.20", 24));
        reconciler
            .reconcile_ip_address(&machine, &scope("m1"), hw)
            .await
            .unwrap();

        let stored = mock.get_hardware("default", "hw-0").await.unwrap().unwrap();
        assert_eq!(stored.primary_address(), Some("10.1.0.20"));
        assert_inventory_fields(&stored);
    }

    #[tokio::test]
    async fn test_invalid_prefix_is_rejected() {
        let mock = MockInfraClient::new();
        let reconciler = create_test_reconciler(&mock);
        let machine = ipam_machine("m1");
        let hw = create_test_hardware("hw-0", "default", "aa:bb:cc:dd:ee:00", None);

        reconciler
            .reconcile_ip_address(&machine, &scope("m1"), hw.clone())
            .await
            .unwrap();
        mock.grant_ip_address_claim("default", "m1-0", "bad");
        mock.add_ip_address(create_test_ip_address("bad", "default", "10.1.0.20", 40));

        let err = reconciler
            .reconcile_ip_address(&machine, &scope("m1"), hw)
            .await
            .unwrap_err();
        assert!(matches!(err, ControllerError::InvalidAddress(_)));
    }

    #[tokio::test]
    async fn test_release_removes_guard_and_deletes_claim() {
        let mock = MockInfraClient::new();
        let reconciler = create_test_reconciler(&mock);
        let machine = ipam_machine("m1");
        let hw = create_test_hardware("hw-0", "default", "aa:bb:cc:dd:ee:00", None);

        reconciler
            .reconcile_ip_address(&machine, &scope("m1"), hw)
            .await
            .unwrap();
        assert!(mock.get_ip_address_claim("default", "m1-0").await.unwrap().is_some());

        reconciler.release_ip_address_claim(&machine).await.unwrap();
        assert!(mock.get_ip_address_claim("default", "m1-0").await.unwrap().is_none());

        // Nothing left to release
        reconciler.release_ip_address_claim(&machine).await.unwrap();
    }
}
