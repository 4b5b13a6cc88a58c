//! Unit tests for BMC power jobs

#[cfg(test)]
mod tests {
    use crate::error::ControllerError;
    use crate::reconciler::bmc::{JobProgress, PowerJobKind};
    use crate::test_utils::*;
    use crds::*;
    use infra_client::{InfraClientTrait, MockInfraClient};
    use kube::ResourceExt;

    #[test]
    fn test_job_names() {
        assert_eq!(PowerJobKind::Provision.job_name("m1"), "m1-provision");
        assert_eq!(PowerJobKind::PowerOff.job_name("m1"), "m1-poweroff");
    }

    #[test]
    fn test_provision_tasks_follow_uefi_flag() {
        let mut hw = create_test_hardware_with_bmc("hw-0", "default", "aa:bb:cc:dd:ee:00", None);
        let tasks = PowerJobKind::Provision.tasks(&hw);
        assert_eq!(
            tasks,
            vec![
                Action::power(PowerAction::Off),
                Action::boot_device(BootDevice::Pxe, false),
                Action::power(PowerAction::On),
            ]
        );

        if let Some(dhcp) = hw.spec.interfaces[0].dhcp.as_mut() {
            dhcp.uefi = Some(true);
        }
        let tasks = PowerJobKind::Provision.tasks(&hw);
        assert_eq!(tasks[1], Action::boot_device(BootDevice::Pxe, true));

        assert_eq!(
            PowerJobKind::PowerOff.tasks(&hw),
            vec![Action::power(PowerAction::Off)]
        );
    }

    #[tokio::test]
    async fn test_job_lifecycle() {
        let mock = MockInfraClient::new();
        let reconciler = create_test_reconciler(&mock);
        let machine = create_test_tinkerbell_machine("m1", "default");
        let hw = create_test_hardware_with_bmc("hw-0", "default", "aa:bb:cc:dd:ee:00", None);

        let progress = reconciler
            .ensure_power_job(&machine, &hw, PowerJobKind::Provision)
            .await
            .unwrap();
        assert_eq!(progress, JobProgress::Pending);

        let job = mock.get_job("default", "m1-provision").await.unwrap().unwrap();
        assert_eq!(job.spec.machine_ref.name, "hw-0-bmc");
        assert_eq!(job.spec.machine_ref.namespace, "default");
        assert_eq!(job.spec.tasks.len(), 3);
        assert_eq!(job.owner_references()[0].name, "m1");

        // A second pass does not recreate the job
        let writes = mock.write_count();
        let progress = reconciler
            .ensure_power_job(&machine, &hw, PowerJobKind::Provision)
            .await
            .unwrap();
        assert_eq!(progress, JobProgress::Pending);
        assert_eq!(mock.write_count(), writes);

        mock.set_job_conditions("default", "m1-provision", true, false);
        let progress = reconciler
            .ensure_power_job(&machine, &hw, PowerJobKind::Provision)
            .await
            .unwrap();
        assert_eq!(progress, JobProgress::Completed);
    }

    #[tokio::test]
    async fn test_failed_job_is_terminal() {
        let mock = MockInfraClient::new();
        let reconciler = create_test_reconciler(&mock);
        let machine = create_test_tinkerbell_machine("m1", "default");
        let hw = create_test_hardware_with_bmc("hw-0", "default", "aa:bb:cc:dd:ee:00", None);

        reconciler
            .ensure_power_job(&machine, &hw, PowerJobKind::PowerOff)
            .await
            .unwrap();
        mock.set_job_conditions("default", "m1-poweroff", false, true);

        let err = reconciler
            .ensure_power_job(&machine, &hw, PowerJobKind::PowerOff)
            .await
            .unwrap_err();
        assert!(!err.is_transient());
        match err {
            ControllerError::PowerJobFailed { job, message } => {
                assert_eq!(job, "default/m1-poweroff");
                assert_eq!(message, "power action failed");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
