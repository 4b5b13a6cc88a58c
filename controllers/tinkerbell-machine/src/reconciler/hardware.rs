//! Hardware ownership binding.
//!
//! Ownership is recorded on the Hardware itself through the owner-name and
//! owner-namespace labels plus a finalizer. The binder always looks for
//! Hardware already carrying this machine's labels before selecting new
//! Hardware, so a pass that crashed after writing the labels recovers the
//! same host instead of claiming a second one.
//!
//! Every write is a merge patch carrying the observed `resourceVersion`. Two
//! controllers racing for the same Hardware cannot both win: the loser gets
//! a conflict and retries with a fresh list.

use super::affinity::select_hardware;
use super::scope::MachineScope;
use super::Reconciler;
use crate::error::ControllerError;
use crate::reconcile_helpers::{finalizers_with, finalizers_without, object_key, provider_id};
use crds::{
    Hardware, Netboot, TinkerbellMachine, HARDWARE_FINALIZER, HARDWARE_OWNER_NAMESPACE_LABEL,
    HARDWARE_OWNER_NAME_LABEL, HARDWARE_PROVISIONED_ANNOTATION, HARDWARE_STATE_IN_USE,
    INSTANCE_STATE_PROVISIONED,
};
use kube::ResourceExt;
use serde_json::json;
use tracing::{debug, info, warn};

/// Label selector for Hardware owned by the given machine
pub fn owner_selector(name: &str, namespace: &str) -> String {
    format!(
        "{}={},{}={}",
        HARDWARE_OWNER_NAME_LABEL, name, HARDWARE_OWNER_NAMESPACE_LABEL, namespace
    )
}

/// Label selector for Hardware not owned by any machine
pub fn unowned_selector() -> String {
    format!("!{}", HARDWARE_OWNER_NAME_LABEL)
}

/// Checks that bound Hardware carries what provisioning needs.
///
/// The primary interface needs DHCP with a MAC, at least one disk is
/// required, and without an IPAM pool the primary interface must already
/// have an address.
pub fn validate_hardware(hardware: &Hardware, uses_ipam: bool) -> Result<(), ControllerError> {
    let name = object_key(hardware);
    if hardware.primary_interface().is_none() {
        return Err(ControllerError::InvalidHardware(format!("{}: no network interfaces", name)));
    }
    if hardware.primary_dhcp().is_none() {
        return Err(ControllerError::InvalidHardware(format!(
            "{}: primary interface has no DHCP configuration",
            name
        )));
    }
    if hardware.primary_mac().is_none() {
        return Err(ControllerError::InvalidHardware(format!(
            "{}: primary interface has no MAC address",
            name
        )));
    }
    if !hardware.spec.disks.iter().any(|d| !d.device.is_empty()) {
        return Err(ControllerError::InvalidHardware(format!("{}: no disks", name)));
    }
    if !uses_ipam && hardware.primary_address().is_none() {
        return Err(ControllerError::InvalidHardware(format!(
            "{}: primary interface has no IP address and no IPAM pool is set",
            name
        )));
    }
    Ok(())
}

impl Reconciler {
    /// Returns the Hardware bound to `machine`, binding one if necessary.
    pub(crate) async fn ensure_hardware(
        &self,
        machine: &TinkerbellMachine,
        scope: &MachineScope,
    ) -> Result<Hardware, ControllerError> {
        let key = object_key(machine);

        if let Some(hardware) = self.find_owned_hardware(machine).await? {
            debug!("TinkerbellMachine {} is bound to Hardware {}", key, hardware.name_any());
            return Ok(hardware);
        }

        let namespace = machine.namespace().unwrap_or_default();
        let candidates = self
            .client
            .list_hardware(&namespace, Some(&unowned_selector()))
            .await?;
        let chosen = select_hardware(machine.spec.hardware_affinity.as_ref(), &candidates)
            .map_err(|e| match e {
                ControllerError::NoHardwareAvailable(reason) => {
                    ControllerError::NoHardwareAvailable(format!("{}: {}", key, reason))
                }
                other => other,
            })?;

        let hardware = self.claim_hardware(machine, scope, chosen).await?;
        info!("Bound TinkerbellMachine {} to Hardware {}", key, hardware.name_any());
        Ok(hardware)
    }

    /// Hardware already carrying this machine's owner labels
    pub(crate) async fn find_owned_hardware(
        &self,
        machine: &TinkerbellMachine,
    ) -> Result<Option<Hardware>, ControllerError> {
        let namespace = machine.namespace().unwrap_or_default();
        let mut owned = self
            .client
            .list_hardware(&namespace, Some(&owner_selector(&machine.name_any(), &namespace)))
            .await?;
        if owned.len() > 1 {
            warn!(
                "TinkerbellMachine {} owns {} Hardware objects, using the first by name",
                object_key(machine),
                owned.len()
            );
        }
        owned.sort_by_key(|hw| hw.name_any());
        Ok(owned.into_iter().next())
    }

    /// Writes ownership onto `hardware` and prepares it for provisioning.
    ///
    /// The same conditional patch sets the owner labels, the finalizer, the
    /// bootstrap user data, the instance metadata and the netboot flags of
    /// the primary interface, so a bound Hardware is always prepared.
    pub(crate) async fn claim_hardware(
        &self,
        machine: &TinkerbellMachine,
        scope: &MachineScope,
        hardware: &Hardware,
    ) -> Result<Hardware, ControllerError> {
        let namespace = hardware.namespace().unwrap_or_default();
        // Interfaces are a list, so the patch replaces them wholesale; fields
        // not modelled here ride along in `extra`
        let mut interfaces = hardware.spec.interfaces.clone();
        if let Some(primary) = interfaces.first_mut() {
            let netboot = primary.netboot.get_or_insert_with(Netboot::default);
            netboot.allow_pxe = Some(true);
            netboot.allow_workflow = Some(true);
        }
        let hostname = hardware
            .primary_dhcp()
            .and_then(|d| d.hostname.clone())
            .filter(|h| !h.is_empty())
            .unwrap_or_else(|| machine.name_any());

        let patch = json!({
            "metadata": {
                "resourceVersion": hardware.resource_version(),
                "labels": {
                    HARDWARE_OWNER_NAME_LABEL: machine.name_any(),
                    HARDWARE_OWNER_NAMESPACE_LABEL: machine.namespace().unwrap_or_default(),
                },
                "finalizers": finalizers_with(hardware, HARDWARE_FINALIZER),
            },
            "spec": {
                "userData": scope.bootstrap_data,
                "interfaces": interfaces,
                "metadata": {
                    "instance": {
                        "id": hardware.primary_mac(),
                        "hostname": hostname,
                    }
                }
            }
        });

        Ok(self
            .client
            .patch_hardware(&namespace, &hardware.name_any(), &patch)
            .await?)
    }

    /// Records the provider identity and hardware name on the machine spec.
    pub(crate) async fn ensure_provider_id(
        &self,
        machine: &TinkerbellMachine,
        hardware: &Hardware,
    ) -> Result<TinkerbellMachine, ControllerError> {
        let provider_id = provider_id(hardware);
        let hardware_name = hardware.name_any();
        if machine.spec.provider_id.as_deref() == Some(provider_id.as_str())
            && machine.spec.hardware_name.as_deref() == Some(hardware_name.as_str())
        {
            return Ok(machine.clone());
        }

        let patch = json!({
            "metadata": { "resourceVersion": machine.resource_version() },
            "spec": {
                "providerID": provider_id,
                "hardwareName": hardware_name,
            }
        });
        let updated = self
            .client
            .patch_tinkerbell_machine(&machine.namespace().unwrap_or_default(), &machine.name_any(), &patch)
            .await?;
        info!("Set providerID {} on TinkerbellMachine {}", provider_id, object_key(machine));
        Ok(updated)
    }

    /// Marks Hardware as provisioned so later passes take the fast path.
    pub(crate) async fn mark_hardware_provisioned(
        &self,
        hardware: &Hardware,
    ) -> Result<Hardware, ControllerError> {
        let patch = json!({
            "metadata": {
                "resourceVersion": hardware.resource_version(),
                "annotations": { HARDWARE_PROVISIONED_ANNOTATION: "true" },
            },
            "spec": {
                "metadata": {
                    "state": HARDWARE_STATE_IN_USE,
                    "instance": { "state": INSTANCE_STATE_PROVISIONED },
                }
            }
        });
        let updated = self
            .client
            .patch_hardware(&hardware.namespace().unwrap_or_default(), &hardware.name_any(), &patch)
            .await?;
        info!("Marked Hardware {} as provisioned", object_key(hardware));
        Ok(updated)
    }

    /// Strips ownership from Hardware so it can be claimed again.
    ///
    /// Hardware that has meanwhile been claimed by a different machine is
    /// left untouched.
    pub(crate) async fn release_hardware(
        &self,
        machine: &TinkerbellMachine,
        hardware: &Hardware,
    ) -> Result<(), ControllerError> {
        let key = object_key(hardware);
        let owner_matches =
            hardware.is_owned_by(&machine.name_any(), &machine.namespace().unwrap_or_default());
        if hardware.owner_name().is_some() && !owner_matches {
            warn!(
                "Hardware {} is owned by {:?}, not releasing it for TinkerbellMachine {}",
                key,
                hardware.owner_name(),
                object_key(machine)
            );
            return Ok(());
        }

        let mut patch = json!({
            "metadata": {
                "resourceVersion": hardware.resource_version(),
                "labels": {
                    HARDWARE_OWNER_NAME_LABEL: null,
                    HARDWARE_OWNER_NAMESPACE_LABEL: null,
                },
                "annotations": { HARDWARE_PROVISIONED_ANNOTATION: null },
                "finalizers": finalizers_without(hardware, HARDWARE_FINALIZER),
            },
            "spec": {
                "metadata": {
                    "state": null,
                    "instance": { "state": null },
                }
            }
        });

        // A pool address goes back with the claim; operator-set addresses stay
        let claimed = self.claimed_address(machine).await?;
        if claimed.is_some() && hardware.primary_address() == claimed.as_deref() {
            let mut interfaces = hardware.spec.interfaces.clone();
            if let Some(dhcp) = interfaces.first_mut().and_then(|i| i.dhcp.as_mut()) {
                if dhcp.ip.as_ref().is_some_and(|ip| ip.extra.is_empty()) {
                    dhcp.ip = None;
                } else if let Some(ip) = dhcp.ip.as_mut() {
                    ip.address = String::new();
                    ip.netmask = None;
                    ip.gateway = None;
                }
            }
            patch["spec"]["interfaces"] = json!(interfaces);
        }
        self.client
            .patch_hardware(&hardware.namespace().unwrap_or_default(), &hardware.name_any(), &patch)
            .await?;
        info!("Released Hardware {} from TinkerbellMachine {}", key, object_key(machine));
        Ok(())
    }
}
