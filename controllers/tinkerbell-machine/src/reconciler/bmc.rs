//! BMC power jobs.
//!
//! Two jobs exist per machine, named `<machine>-provision` and
//! `<machine>-poweroff`. A job is created once with a fixed action list; later
//! passes only read its conditions.

use super::Reconciler;
use crate::error::ControllerError;
use crate::reconcile_helpers::object_key;
use crds::{Action, BootDevice, Hardware, Job, JobSpec, MachineRef, PowerAction, TinkerbellMachine};
use infra_client::InfraError;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::{Resource, ResourceExt};
use tracing::{debug, info};

/// Purpose of a power job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerJobKind {
    /// Power cycle into a one-time network boot before provisioning
    Provision,
    /// Power off before the hardware is released
    PowerOff,
}

impl PowerJobKind {
    /// Deterministic job name for a machine
    pub fn job_name(self, machine_name: &str) -> String {
        match self {
            Self::Provision => format!("{}-provision", machine_name),
            Self::PowerOff => format!("{}-poweroff", machine_name),
        }
    }

    /// Ordered action list for the job
    pub fn tasks(self, hardware: &Hardware) -> Vec<Action> {
        match self {
            Self::Provision => {
                let efi_boot = hardware.uses_uefi();
                vec![
                    Action::power(PowerAction::Off),
                    Action::boot_device(BootDevice::Pxe, efi_boot),
                    Action::power(PowerAction::On),
                ]
            }
            Self::PowerOff => vec![Action::power(PowerAction::Off)],
        }
    }
}

/// Observed progress of a power job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobProgress {
    /// Job reported Completed
    Completed,
    /// Job was just created or is still running
    Pending,
}

impl Reconciler {
    /// Creates the power job if needed and reports its progress.
    ///
    /// A job reporting a failed condition is a terminal error; it is never
    /// recreated automatically.
    pub(crate) async fn ensure_power_job(
        &self,
        machine: &TinkerbellMachine,
        hardware: &Hardware,
        kind: PowerJobKind,
    ) -> Result<JobProgress, ControllerError> {
        let namespace = machine.namespace().unwrap_or_default();
        let name = kind.job_name(&machine.name_any());

        let Some(job) = self.client.get_job(&namespace, &name).await? else {
            self.create_power_job(machine, hardware, kind, &name).await?;
            return Ok(JobProgress::Pending);
        };

        if job.is_failed() {
            return Err(ControllerError::PowerJobFailed {
                job: format!("{}/{}", namespace, name),
                message: job.failure_message().unwrap_or("no message").to_string(),
            });
        }
        if job.is_completed() {
            debug!("BMC job {}/{} completed", namespace, name);
            return Ok(JobProgress::Completed);
        }

        debug!("BMC job {}/{} still running", namespace, name);
        Ok(JobProgress::Pending)
    }

    async fn create_power_job(
        &self,
        machine: &TinkerbellMachine,
        hardware: &Hardware,
        kind: PowerJobKind,
        name: &str,
    ) -> Result<(), ControllerError> {
        let bmc_name = hardware
            .spec
            .bmc_ref
            .as_ref()
            .map(|r| r.name.clone())
            .filter(|n| !n.is_empty())
            .ok_or_else(|| {
                ControllerError::InvalidHardware(format!("{}: no BMC reference", object_key(hardware)))
            })?;

        let job = Job {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: machine.namespace(),
                owner_references: machine.controller_owner_ref(&()).map(|r| vec![r]),
                ..Default::default()
            },
            spec: JobSpec {
                machine_ref: MachineRef {
                    name: bmc_name,
                    namespace: hardware.namespace().unwrap_or_default(),
                },
                tasks: kind.tasks(hardware),
            },
            status: None,
        };

        match self.client.create_job(&job).await {
            Ok(_) => {
                info!("Created BMC job {} for Hardware {}", object_key(&job), object_key(hardware));
                Ok(())
            }
            Err(InfraError::AlreadyExists(_)) => {
                debug!("BMC job {} already exists", object_key(&job));
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}
