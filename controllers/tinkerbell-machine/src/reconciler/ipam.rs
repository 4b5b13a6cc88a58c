//! IP address claims for the primary interface.
//!
//! Only used when the machine names an IPAM pool. The claim is named
//! `<machine>-<interface index>`, protected by the IPAM finalizer and labelled
//! with the cluster name. Once the provider grants an address, it is written
//! into the primary interface of the bound Hardware.

use super::scope::MachineScope;
use super::Reconciler;
use crate::error::ControllerError;
use crate::reconcile_helpers::{finalizers_patch, finalizers_without, has_finalizer, object_key};
use crds::{
    Hardware, IPAddressClaim, IPAddressClaimSpec, Ip, TinkerbellMachine, CLUSTER_NAME_LABEL,
    IP_CLAIM_FINALIZER,
};
use infra_client::InfraError;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::{Resource, ResourceExt};
use serde_json::json;
use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use tracing::{debug, info};

/// Index of the interface the claim is made for
const PRIMARY_INTERFACE_INDEX: usize = 0;

/// Dotted netmask for an IPv4 prefix length.
///
/// Returns an empty string for prefixes outside `0..=32`.
pub fn netmask_from_prefix(prefix: i32) -> String {
    match u32::try_from(prefix) {
        Ok(0) => Ipv4Addr::UNSPECIFIED.to_string(),
        Ok(bits @ 1..=32) => Ipv4Addr::from(u32::MAX << (32 - bits)).to_string(),
        _ => String::new(),
    }
}

/// Deterministic claim name for an interface of a machine
pub fn claim_name(machine_name: &str, interface_index: usize) -> String {
    format!("{}-{}", machine_name, interface_index)
}

/// Result of the address step
#[derive(Debug)]
pub enum AddressState {
    /// Hardware has a usable address (static, granted, or no IPAM in use)
    Ready(Box<Hardware>),
    /// Claim created or not granted yet
    Pending,
}

impl Reconciler {
    /// Ensures the primary interface of `hardware` carries an address.
    pub(crate) async fn reconcile_ip_address(
        &self,
        machine: &TinkerbellMachine,
        scope: &MachineScope,
        hardware: Hardware,
    ) -> Result<AddressState, ControllerError> {
        let Some(pool_ref) = machine.spec.ipam_pool_ref.clone() else {
            return Ok(AddressState::Ready(Box::new(hardware)));
        };
        // Operator-entered addresses win
        if hardware.primary_address().is_some() {
            debug!("Hardware {} already has an address, skipping IPAM", object_key(&hardware));
            return Ok(AddressState::Ready(Box::new(hardware)));
        }

        let namespace = machine.namespace().unwrap_or_default();
        let name = claim_name(&machine.name_any(), PRIMARY_INTERFACE_INDEX);

        let Some(claim) = self.client.get_ip_address_claim(&namespace, &name).await? else {
            let claim = IPAddressClaim {
                metadata: ObjectMeta {
                    name: Some(name.clone()),
                    namespace: Some(namespace.clone()),
                    labels: Some(BTreeMap::from([(
                        CLUSTER_NAME_LABEL.to_string(),
                        scope.cluster_name.clone(),
                    )])),
                    finalizers: Some(vec![IP_CLAIM_FINALIZER.to_string()]),
                    owner_references: machine.controller_owner_ref(&()).map(|r| vec![r]),
                    ..Default::default()
                },
                spec: IPAddressClaimSpec { pool_ref },
                status: None,
            };
            match self.client.create_ip_address_claim(&claim).await {
                Ok(_) => info!("Created IPAddressClaim {}/{}", namespace, name),
                Err(InfraError::AlreadyExists(_)) => debug!("IPAddressClaim {}/{} already exists", namespace, name),
                Err(e) => return Err(e.into()),
            }
            return Ok(AddressState::Pending);
        };

        let Some(address_name) = claim.granted_address() else {
            debug!("IPAddressClaim {}/{} is not granted yet", namespace, name);
            return Ok(AddressState::Pending);
        };
        let Some(address) = self.client.get_ip_address(&namespace, address_name).await? else {
            debug!("IPAddress {}/{} referenced by claim {} not found yet", namespace, address_name, name);
            return Ok(AddressState::Pending);
        };

        let netmask = netmask_from_prefix(address.spec.prefix);
        if netmask.is_empty() {
            return Err(ControllerError::InvalidAddress(format!(
                "{}/{} has prefix {}",
                namespace, address_name, address.spec.prefix
            )));
        }
        let mut interfaces = hardware.spec.interfaces.clone();
        let Some(dhcp) = interfaces
            .get_mut(PRIMARY_INTERFACE_INDEX)
            .and_then(|i| i.dhcp.as_mut())
        else {
            return Err(ControllerError::InvalidHardware(format!(
                "{}: primary interface has no DHCP configuration",
                object_key(&hardware)
            )));
        };
        let ip = dhcp.ip.get_or_insert_with(Ip::default);
        if ip.address == address.spec.address
            && ip.netmask.as_deref() == Some(netmask.as_str())
            && ip.gateway == address.spec.gateway
        {
            return Ok(AddressState::Ready(Box::new(hardware)));
        }
        ip.address = address.spec.address.clone();
        ip.netmask = Some(netmask);
        ip.gateway = address.spec.gateway.clone();

        let patch = json!({
            "metadata": { "resourceVersion": hardware.resource_version() },
            "spec": { "interfaces": interfaces },
        });
        let updated = self
            .client
            .patch_hardware(&hardware.namespace().unwrap_or_default(), &hardware.name_any(), &patch)
            .await?;
        info!(
            "Assigned address {} from claim {}/{} to Hardware {}",
            address.spec.address,
            namespace,
            name,
            object_key(&updated)
        );
        Ok(AddressState::Ready(Box::new(updated)))
    }

    /// Address granted to the machine's claim, if the claim exists and is bound
    pub(crate) async fn claimed_address(
        &self,
        machine: &TinkerbellMachine,
    ) -> Result<Option<String>, ControllerError> {
        if machine.spec.ipam_pool_ref.is_none() {
            return Ok(None);
        }
        let namespace = machine.namespace().unwrap_or_default();
        let name = claim_name(&machine.name_any(), PRIMARY_INTERFACE_INDEX);

        let Some(claim) = self.client.get_ip_address_claim(&namespace, &name).await? else {
            return Ok(None);
        };
        let Some(address_name) = claim.granted_address() else {
            return Ok(None);
        };
        Ok(self
            .client
            .get_ip_address(&namespace, address_name)
            .await?
            .map(|address| address.spec.address))
    }

    /// Removes the claim guard and deletes the claim, tolerating its absence.
    pub(crate) async fn release_ip_address_claim(
        &self,
        machine: &TinkerbellMachine,
    ) -> Result<(), ControllerError> {
        let namespace = machine.namespace().unwrap_or_default();
        let name = claim_name(&machine.name_any(), PRIMARY_INTERFACE_INDEX);

        let Some(claim) = self.client.get_ip_address_claim(&namespace, &name).await? else {
            return Ok(());
        };
        if has_finalizer(&claim, IP_CLAIM_FINALIZER) {
            let patch = finalizers_patch(&claim, finalizers_without(&claim, IP_CLAIM_FINALIZER));
            match self.client.patch_ip_address_claim(&namespace, &name, &patch).await {
                Ok(_) | Err(InfraError::NotFound(_)) => {}
                Err(e) => return Err(e.into()),
            }
        }
        if self.client.delete_ip_address_claim(&namespace, &name).await? {
            info!("Deleted IPAddressClaim {}/{}", namespace, name);
        }
        Ok(())
    }
}
