//! Provisioning state machine.
//!
//! Progress is derived from reads on every pass, never remembered:
//! - Hardware carries the provisioned annotation: done (fast path)
//! - no Workflow yet: power cycle through the BMC (if any), then create the
//!   Template and the Workflow, both named after the machine
//! - Workflow pending or running: wait for the next watch event
//! - Workflow succeeded: mark the Hardware provisioned
//! - Workflow failed or timed out: terminal error
//!
//! The Template is created once and never re-rendered, even if the image
//! lookup fields of the machine change later.

use super::bmc::{JobProgress, PowerJobKind};
use super::scope::MachineScope;
use super::template::{render_default_template, ImageLookup};
use super::Reconciler;
use crate::error::ControllerError;
use crate::reconcile_helpers::{machine_addresses, object_key, ready_status_needs_update, ready_status_patch};
use crds::{
    BootMode, Hardware, Template, TemplateSpec, TinkerbellMachine, Workflow, WorkflowBootOptions,
    WorkflowSpec, WorkflowState,
};
use infra_client::InfraError;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::{Resource, ResourceExt};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Key under which the workflow addresses the bound hardware
pub const HARDWARE_MAP_DEVICE_KEY: &str = "device_1";

/// Observed provisioning state for one pass
#[derive(Debug)]
pub enum ProvisioningState {
    /// Hardware is provisioned; the machine can be marked ready
    Provisioned(Box<Hardware>),
    /// Waiting for the pre-provisioning power job
    PoweringOn,
    /// Template or Workflow was just created
    Created,
    /// Workflow has not reached a terminal state
    InProgress(WorkflowState),
}

/// Boot options for the Workflow of `machine` on `hardware`.
///
/// ISO boot needs an `isoURL` and a BMC to mount it; the URL is rewritten per
/// host to `<isoURL>/<mac-with-dashes>/hook.iso`.
pub fn workflow_boot_options(
    machine: &TinkerbellMachine,
    hardware: &Hardware,
) -> Result<WorkflowBootOptions, ControllerError> {
    let options = &machine.spec.boot_options;
    match options.boot_mode.unwrap_or_default() {
        BootMode::Netboot => Ok(WorkflowBootOptions {
            toggle_allow_netboot: true,
            iso_url: None,
            boot_mode: Some("netboot".to_string()),
        }),
        BootMode::Iso => {
            let iso_url = options
                .iso_url
                .as_deref()
                .filter(|u| !u.is_empty())
                .ok_or_else(|| {
                    ControllerError::InvalidBootOptions(format!(
                        "{}: boot mode iso requires isoURL",
                        object_key(machine)
                    ))
                })?;
            if !hardware.has_bmc() {
                return Err(ControllerError::InvalidBootOptions(format!(
                    "{}: boot mode iso requires Hardware {} to have a BMC reference",
                    object_key(machine),
                    hardware.name_any()
                )));
            }
            let mac = hardware.primary_mac().ok_or_else(|| {
                ControllerError::InvalidHardware(format!(
                    "{}: primary interface has no MAC address",
                    object_key(hardware)
                ))
            })?;
            Ok(WorkflowBootOptions {
                toggle_allow_netboot: true,
                iso_url: Some(format!(
                    "{}/{}/hook.iso",
                    iso_url.trim_end_matches('/'),
                    mac.replace(':', "-")
                )),
                boot_mode: Some("isoboot".to_string()),
            })
        }
    }
}

impl Reconciler {
    /// Drives provisioning of `hardware` one step further.
    pub(crate) async fn reconcile_provisioning(
        &self,
        machine: &TinkerbellMachine,
        scope: &MachineScope,
        hardware: &Hardware,
    ) -> Result<ProvisioningState, ControllerError> {
        let key = object_key(machine);
        if hardware.is_provisioned() {
            debug!("Hardware {} is already provisioned", object_key(hardware));
            return Ok(ProvisioningState::Provisioned(Box::new(hardware.clone())));
        }

        let namespace = machine.namespace().unwrap_or_default();
        let name = machine.name_any();

        let Some(workflow) = self.client.get_workflow(&namespace, &name).await? else {
            if hardware.has_bmc()
                && self.ensure_power_job(machine, hardware, PowerJobKind::Provision).await?
                    == JobProgress::Pending
            {
                return Ok(ProvisioningState::PoweringOn);
            }
            self.ensure_template(machine, scope, hardware).await?;
            self.create_workflow(machine, hardware).await?;
            return Ok(ProvisioningState::Created);
        };

        match workflow.state() {
            WorkflowState::Success => {
                let hardware = self.mark_hardware_provisioned(hardware).await?;
                info!("Workflow {} succeeded", key);
                Ok(ProvisioningState::Provisioned(Box::new(hardware)))
            }
            WorkflowState::Failed => Err(ControllerError::WorkflowFailed(key)),
            WorkflowState::Timeout => Err(ControllerError::WorkflowTimeout(key)),
            state => Ok(ProvisioningState::InProgress(state)),
        }
    }

    /// Creates the Template unless it already exists.
    async fn ensure_template(
        &self,
        machine: &TinkerbellMachine,
        scope: &MachineScope,
        hardware: &Hardware,
    ) -> Result<(), ControllerError> {
        let namespace = machine.namespace().unwrap_or_default();
        let name = machine.name_any();
        if self.client.get_template(&namespace, &name).await?.is_some() {
            return Ok(());
        }

        let data = match machine.spec.template_override.as_deref().filter(|t| !t.is_empty()) {
            Some(data) => data.to_string(),
            None => {
                let lookup = ImageLookup::resolve(
                    machine,
                    scope.tinkerbell_cluster.as_ref(),
                    scope.kubernetes_version(),
                );
                render_default_template(&name, hardware, &lookup.image_url(), &self.config.metadata_url)?
            }
        };

        let template = Template {
            metadata: ObjectMeta {
                name: Some(name.clone()),
                namespace: Some(namespace.clone()),
                owner_references: machine.controller_owner_ref(&()).map(|r| vec![r]),
                ..Default::default()
            },
            spec: TemplateSpec { data: Some(data) },
            status: None,
        };
        match self.client.create_template(&template).await {
            Ok(_) => {
                info!("Created Template {}/{}", namespace, name);
                Ok(())
            }
            Err(InfraError::AlreadyExists(_)) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn create_workflow(
        &self,
        machine: &TinkerbellMachine,
        hardware: &Hardware,
    ) -> Result<(), ControllerError> {
        let namespace = machine.namespace().unwrap_or_default();
        let name = machine.name_any();
        let mac = hardware.primary_mac().unwrap_or_default().to_string();

        let workflow = Workflow {
            metadata: ObjectMeta {
                name: Some(name.clone()),
                namespace: Some(namespace.clone()),
                owner_references: machine.controller_owner_ref(&()).map(|r| vec![r]),
                ..Default::default()
            },
            spec: WorkflowSpec {
                template_ref: name.clone(),
                hardware_ref: hardware.name_any(),
                hardware_map: BTreeMap::from([(HARDWARE_MAP_DEVICE_KEY.to_string(), mac)]),
                boot_options: workflow_boot_options(machine, hardware)?,
            },
            status: None,
        };
        match self.client.create_workflow(&workflow).await {
            Ok(_) => info!("Created Workflow {}/{} for Hardware {}", namespace, name, hardware.name_any()),
            Err(InfraError::AlreadyExists(_)) => debug!("Workflow {}/{} already exists", namespace, name),
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }

    /// Marks the machine ready with the addresses of its hardware.
    pub(crate) async fn mark_ready(
        &self,
        machine: &TinkerbellMachine,
        hardware: &Hardware,
    ) -> Result<(), ControllerError> {
        let addresses = machine_addresses(hardware);
        if !ready_status_needs_update(machine.status.as_ref(), &addresses) {
            debug!("TinkerbellMachine {} is already ready", object_key(machine));
            return Ok(());
        }
        let patch = ready_status_patch(machine, &addresses);
        self.client
            .patch_tinkerbell_machine_status(&machine.namespace().unwrap_or_default(), &machine.name_any(), &patch)
            .await?;
        info!("TinkerbellMachine {} is ready", object_key(machine));
        Ok(())
    }
}
