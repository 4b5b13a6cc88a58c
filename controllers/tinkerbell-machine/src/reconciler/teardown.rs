//! Teardown of a deleted TinkerbellMachine.
//!
//! Order matters: Template and Workflow go first so the host cannot start a
//! new provisioning run, then the host is powered off, then the Hardware is
//! released, then the address claim. The machine finalizer is removed last.
//! Every step tolerates objects that are already gone, so a pass interrupted
//! halfway simply repeats.

use super::bmc::{JobProgress, PowerJobKind};
use super::Reconciler;
use crate::error::ControllerError;
use crate::reconcile_helpers::{finalizers_patch, finalizers_without, has_finalizer, object_key};
use crds::{Hardware, TinkerbellMachine, MACHINE_FINALIZER};
use kube::ResourceExt;
use kube_runtime::controller::Action;
use tracing::{debug, info, warn};

impl Reconciler {
    pub(crate) async fn reconcile_delete(
        &self,
        machine: &TinkerbellMachine,
    ) -> Result<Action, ControllerError> {
        let key = object_key(machine);
        if !has_finalizer(machine, MACHINE_FINALIZER) {
            debug!("TinkerbellMachine {} has no finalizer, nothing to clean up", key);
            return Ok(Action::await_change());
        }

        let namespace = machine.namespace().unwrap_or_default();
        let name = machine.name_any();

        if self.client.delete_template(&namespace, &name).await? {
            info!("Deleted Template {}/{}", namespace, name);
        }
        if self.client.delete_workflow(&namespace, &name).await? {
            info!("Deleted Workflow {}/{}", namespace, name);
        }

        if let Some(hardware) = self.bound_hardware(machine).await? {
            if hardware.has_bmc()
                && self.ensure_power_job(machine, &hardware, PowerJobKind::PowerOff).await?
                    == JobProgress::Pending
            {
                debug!("TinkerbellMachine {} is waiting for power off", key);
                return Ok(Action::await_change());
            }

            self.release_hardware(machine, &hardware).await?;
        } else {
            debug!("TinkerbellMachine {} has no bound Hardware", key);
        }

        self.release_ip_address_claim(machine).await?;

        let patch = finalizers_patch(machine, finalizers_without(machine, MACHINE_FINALIZER));
        self.client
            .patch_tinkerbell_machine(&namespace, &name, &patch)
            .await?;
        info!("Removed finalizer from TinkerbellMachine {}", key);
        self.forget(&key);
        Ok(Action::await_change())
    }

    /// Hardware recorded in the machine spec, or found through owner labels
    /// when the spec was never written.
    ///
    /// Hardware whose owner labels name anything but this machine is never
    /// returned, so teardown cannot power off or release another machine's host.
    async fn bound_hardware(
        &self,
        machine: &TinkerbellMachine,
    ) -> Result<Option<Hardware>, ControllerError> {
        let namespace = machine.namespace().unwrap_or_default();
        let name = machine.name_any();
        if let Some(hardware_name) = machine.spec.hardware_name.as_deref().filter(|n| !n.is_empty()) {
            match self.client.get_hardware(&namespace, hardware_name).await? {
                Some(hardware) if hardware.is_owned_by(&name, &namespace) => return Ok(Some(hardware)),
                Some(hardware) => warn!(
                    "Hardware {} is owned by {:?}, not tearing it down for TinkerbellMachine {}",
                    object_key(&hardware),
                    hardware.owner_name(),
                    object_key(machine)
                ),
                None => {}
            }
        }
        self.find_owned_hardware(machine).await
    }
}
