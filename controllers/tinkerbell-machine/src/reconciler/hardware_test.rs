//! Unit tests for hardware binding and release

#[cfg(test)]
mod tests {
    use crate::error::ControllerError;
    use crate::reconciler::hardware::{owner_selector, unowned_selector, validate_hardware};
    use crate::reconciler::scope::MachineScope;
    use crate::test_utils::*;
    use crds::*;
    use infra_client::{InfraClientTrait, InfraError, MockInfraClient};
    use kube::ResourceExt;
    use std::collections::HashSet;

    fn scope(machine_name: &str, namespace: &str) -> MachineScope {
        MachineScope {
            machine: create_test_machine(machine_name, namespace),
            cluster_name: TEST_CLUSTER.to_string(),
            bootstrap_data: "#cloud-config\n".to_string(),
            tinkerbell_cluster: None,
        }
    }

    async fn stored_machine(mock: &MockInfraClient, name: &str) -> TinkerbellMachine {
        mock.add_tinkerbell_machine(create_test_tinkerbell_machine(name, "default"));
        mock.get_tinkerbell_machine("default", name).await.unwrap().unwrap()
    }

    #[test]
    fn test_selectors() {
        assert_eq!(
            owner_selector("m1", "default"),
            "v1alpha1.tinkerbell.org/ownerName=m1,v1alpha1.tinkerbell.org/ownerNamespace=default"
        );
        assert_eq!(unowned_selector(), "!v1alpha1.tinkerbell.org/ownerName");
    }

    #[tokio::test]
    async fn test_claim_writes_ownership_and_prepares_hardware() {
        let mock = MockInfraClient::new();
        mock.add_hardware(create_test_hardware("hw-0", "default", "aa:bb:cc:dd:ee:00", Some("10.0.0.10")));
        let machine = stored_machine(&mock, "m1").await;
        let reconciler = create_test_reconciler(&mock);

        let hw = reconciler.ensure_hardware(&machine, &scope("m1", "default")).await.unwrap();

        assert_eq!(hw.name_any(), "hw-0");
        assert_eq!(hw.owner_name(), Some("m1"));
        assert_eq!(
            hw.labels().get(HARDWARE_OWNER_NAMESPACE_LABEL).map(String::as_str),
            Some("default")
        );
        assert!(hw.finalizers().contains(&HARDWARE_FINALIZER.to_string()));
        assert_eq!(hw.spec.user_data.as_deref(), Some("#cloud-config\n"));

        let netboot = hw.spec.interfaces[0].netboot.clone().unwrap();
        assert_eq!(netboot.allow_pxe, Some(true));
        assert_eq!(netboot.allow_workflow, Some(true));

        let instance = hw.spec.metadata.as_ref().and_then(|m| m.instance.clone()).unwrap();
        assert_eq!(instance.id.as_deref(), Some("aa:bb:cc:dd:ee:00"));
        assert_eq!(instance.hostname.as_deref(), Some("hw-0"));
    }

    #[tokio::test]
    async fn test_claim_keeps_inventory_fields() {
        let mock = MockInfraClient::new();
        mock.add_hardware(with_inventory_fields(create_test_hardware(
            "hw-0",
            "default",
            "aa:bb:cc:dd:ee:00",
            Some("10.0.0.10"),
        )));
        let machine = stored_machine(&mock, "m1").await;
        let reconciler = create_test_reconciler(&mock);

        reconciler.ensure_hardware(&machine, &scope("m1", "default")).await.unwrap();

        let stored = mock.get_hardware("default", "hw-0").await.unwrap().unwrap();
        assert_eq!(stored.owner_name(), Some("m1"));
        assert_eq!(stored.spec.interfaces[0].netboot.as_ref().unwrap().allow_pxe, Some(true));
        assert_inventory_fields(&stored);
    }

    #[tokio::test]
    async fn test_owned_hardware_is_recovered_without_new_claim() {
        let mock = MockInfraClient::new();
        let mut owned = create_test_hardware("hw-9", "default", "aa:bb:cc:dd:ee:09", Some("10.0.0.19"));
        owned.metadata.labels = Some(
            [
                (HARDWARE_OWNER_NAME_LABEL.to_string(), "m1".to_string()),
                (HARDWARE_OWNER_NAMESPACE_LABEL.to_string(), "default".to_string()),
            ]
            .into(),
        );
        mock.add_hardware(owned);
        mock.add_hardware(create_test_hardware("hw-0", "default", "aa:bb:cc:dd:ee:00", Some("10.0.0.10")));
        let machine = stored_machine(&mock, "m1").await;
        let reconciler = create_test_reconciler(&mock);

        let writes = mock.write_count();
        let hw = reconciler.ensure_hardware(&machine, &scope("m1", "default")).await.unwrap();

        assert_eq!(hw.name_any(), "hw-9");
        assert_eq!(mock.write_count(), writes);
        let untouched = mock.get_hardware("default", "hw-0").await.unwrap().unwrap();
        assert_eq!(untouched.owner_name(), None);
    }

    #[tokio::test]
    async fn test_machines_never_share_hardware() {
        let mock = MockInfraClient::new();
        for i in 0..3 {
            mock.add_hardware(create_test_hardware(
                &format!("hw-{}", i),
                "default",
                &format!("aa:bb:cc:dd:ee:0{}", i),
                Some(&format!("10.0.0.1{}", i)),
            ));
        }
        let reconciler = create_test_reconciler(&mock);

        let mut bound = HashSet::new();
        for i in 0..3 {
            let name = format!("m{}", i);
            let machine = stored_machine(&mock, &name).await;
            let hw = reconciler.ensure_hardware(&machine, &scope(&name, "default")).await.unwrap();
            assert!(bound.insert(hw.name_any()), "{} bound twice", hw.name_any());
        }

        let machine = stored_machine(&mock, "m3").await;
        let err = reconciler
            .ensure_hardware(&machine, &scope("m3", "default"))
            .await
            .unwrap_err();
        match err {
            ControllerError::NoHardwareAvailable(message) => assert!(message.starts_with("default/m3")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_stale_claim_conflicts() {
        let mock = MockInfraClient::new();
        mock.add_hardware(create_test_hardware("hw-0", "default", "aa:bb:cc:dd:ee:00", Some("10.0.0.10")));
        let reconciler = create_test_reconciler(&mock);
        let stale = mock.get_hardware("default", "hw-0").await.unwrap().unwrap();

        let first = stored_machine(&mock, "m1").await;
        reconciler.claim_hardware(&first, &scope("m1", "default"), &stale).await.unwrap();

        let second = stored_machine(&mock, "m2").await;
        let err = reconciler
            .claim_hardware(&second, &scope("m2", "default"), &stale)
            .await
            .unwrap_err();
        assert!(err.is_conflict());
        assert!(matches!(err, ControllerError::Infra(InfraError::Conflict(_))));

        let hw = mock.get_hardware("default", "hw-0").await.unwrap().unwrap();
        assert_eq!(hw.owner_name(), Some("m1"));
    }

    #[tokio::test]
    async fn test_release_strips_ownership() {
        let mock = MockInfraClient::new();
        mock.add_hardware(create_test_hardware("hw-0", "default", "aa:bb:cc:dd:ee:00", Some("10.0.0.10")));
        let machine = stored_machine(&mock, "m1").await;
        let reconciler = create_test_reconciler(&mock);

        let hw = reconciler.ensure_hardware(&machine, &scope("m1", "default")).await.unwrap();
        let hw = reconciler.mark_hardware_provisioned(&hw).await.unwrap();
        assert!(hw.is_provisioned());

        reconciler.release_hardware(&machine, &hw).await.unwrap();

        let released = mock.get_hardware("default", "hw-0").await.unwrap().unwrap();
        assert_eq!(released.owner_name(), None);
        assert!(!released.labels().contains_key(HARDWARE_OWNER_NAMESPACE_LABEL));
        assert!(!released.is_provisioned());
        assert!(released.finalizers().is_empty());
        let metadata = released.spec.metadata.clone().unwrap_or_default();
        assert_eq!(metadata.state, None);
        assert_eq!(metadata.instance.and_then(|i| i.state), None);
    }

    #[tokio::test]
    async fn test_release_skips_hardware_of_another_machine() {
        let mock = MockInfraClient::new();
        mock.add_hardware(create_test_hardware("hw-0", "default", "aa:bb:cc:dd:ee:00", Some("10.0.0.10")));
        let owner = stored_machine(&mock, "m1").await;
        let other = stored_machine(&mock, "m2").await;
        let reconciler = create_test_reconciler(&mock);

        let hw = reconciler.ensure_hardware(&owner, &scope("m1", "default")).await.unwrap();
        reconciler.release_hardware(&other, &hw).await.unwrap();

        let hw = mock.get_hardware("default", "hw-0").await.unwrap().unwrap();
        assert_eq!(hw.owner_name(), Some("m1"));
    }

    #[tokio::test]
    async fn test_provider_id_is_recorded_once() {
        let mock = MockInfraClient::new();
        let hw = create_test_hardware("hw-0", "default", "aa:bb:cc:dd:ee:00", Some("10.0.0.10"));
        let machine = stored_machine(&mock, "m1").await;
        let reconciler = create_test_reconciler(&mock);

        let updated = reconciler.ensure_provider_id(&machine, &hw).await.unwrap();
        assert_eq!(updated.spec.provider_id.as_deref(), Some("tinkerbell://default/hw-0"));
        assert_eq!(updated.spec.hardware_name.as_deref(), Some("hw-0"));

        let writes = mock.write_count();
        reconciler.ensure_provider_id(&updated, &hw).await.unwrap();
        assert_eq!(mock.write_count(), writes);
    }

    #[test]
    fn test_validate_hardware() {
        let hw = create_test_hardware("hw-0", "default", "aa:bb:cc:dd:ee:00", Some("10.0.0.10"));
        assert!(validate_hardware(&hw, false).is_ok());

        let mut no_disks = hw.clone();
        no_disks.spec.disks.clear();
        assert!(matches!(
            validate_hardware(&no_disks, false),
            Err(ControllerError::InvalidHardware(_))
        ));

        let mut no_interfaces = hw.clone();
        no_interfaces.spec.interfaces.clear();
        assert!(validate_hardware(&no_interfaces, false).is_err());

        let mut no_mac = hw.clone();
        if let Some(dhcp) = no_mac.spec.interfaces[0].dhcp.as_mut() {
            dhcp.mac = None;
        }
        assert!(validate_hardware(&no_mac, false).is_err());

        let no_address = create_test_hardware("hw-1", "default", "aa:bb:cc:dd:ee:01", None);
        assert!(validate_hardware(&no_address, false).is_err());
        assert!(validate_hardware(&no_address, true).is_ok());
    }
}
