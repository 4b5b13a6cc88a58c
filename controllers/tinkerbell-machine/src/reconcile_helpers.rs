//! Helper functions for common reconciliation patterns
//!
//! Status patch builders, finalizer list manipulation and the comparisons
//! that keep the controller from writing status it already has. Writing an
//! unchanged status would trigger another watch event and loop forever.

use crds::{Hardware, MachineAddress, MachineAddressType, TinkerbellMachine, TinkerbellMachineStatus};
use kube::ResourceExt;
use serde_json::{json, Value};

/// `namespace/name` key used for logging and backoff tracking
pub fn object_key<K: ResourceExt>(resource: &K) -> String {
    format!("{}/{}", resource.namespace().unwrap_or_default(), resource.name_any())
}

/// Provider identity recorded on the machine once hardware is bound
pub fn provider_id(hardware: &Hardware) -> String {
    format!(
        "tinkerbell://{}/{}",
        hardware.namespace().unwrap_or_default(),
        hardware.name_any()
    )
}

/// Whether `resource` carries the finalizer `token`
pub fn has_finalizer<K: ResourceExt>(resource: &K, token: &str) -> bool {
    resource.finalizers().iter().any(|f| f == token)
}

/// Finalizer list of `resource` with `token` appended (if missing)
pub fn finalizers_with<K: ResourceExt>(resource: &K, token: &str) -> Vec<String> {
    let mut finalizers = resource.finalizers().to_vec();
    if !finalizers.iter().any(|f| f == token) {
        finalizers.push(token.to_string());
    }
    finalizers
}

/// Finalizer list of `resource` with every `token` occurrence removed
pub fn finalizers_without<K: ResourceExt>(resource: &K, token: &str) -> Vec<String> {
    resource
        .finalizers()
        .iter()
        .filter(|f| f.as_str() != token)
        .cloned()
        .collect()
}

/// Conditional merge patch replacing the finalizer list
pub fn finalizers_patch<K: ResourceExt>(resource: &K, finalizers: Vec<String>) -> Value {
    json!({
        "metadata": {
            "resourceVersion": resource.resource_version(),
            "finalizers": finalizers,
        }
    })
}

/// Addresses reported on the machine status for its bound hardware
///
/// `InternalIP` comes from the primary interface address, `Hostname` from its
/// DHCP hostname. Either may be absent.
pub fn machine_addresses(hardware: &Hardware) -> Vec<MachineAddress> {
    let mut addresses = Vec::new();
    if let Some(ip) = hardware.primary_address() {
        addresses.push(MachineAddress {
            address_type: MachineAddressType::InternalIP,
            address: ip.to_string(),
        });
    }
    if let Some(hostname) = hardware
        .primary_dhcp()
        .and_then(|d| d.hostname.as_deref())
        .filter(|h| !h.is_empty())
    {
        addresses.push(MachineAddress {
            address_type: MachineAddressType::Hostname,
            address: hostname.to_string(),
        });
    }
    addresses
}

/// Check whether the ready status would change anything
pub fn ready_status_needs_update(
    current: Option<&TinkerbellMachineStatus>,
    addresses: &[MachineAddress],
) -> bool {
    match current {
        None => true,
        Some(status) => {
            !status.ready
                || status.addresses != addresses
                || status.failure_reason.is_some()
                || status.failure_message.is_some()
        }
    }
}

/// Status patch marking the machine ready and clearing any recorded failure
pub fn ready_status_patch(machine: &TinkerbellMachine, addresses: &[MachineAddress]) -> Value {
    json!({
        "metadata": { "resourceVersion": machine.resource_version() },
        "status": {
            "ready": true,
            "addresses": addresses,
            "instanceStatus": crds::INSTANCE_STATE_PROVISIONED,
            "failureReason": null,
            "failureMessage": null,
            "lastUpdated": chrono::Utc::now(),
        }
    })
}

/// Check whether recording this failure would change the status
pub fn failure_status_needs_update(
    current: Option<&TinkerbellMachineStatus>,
    reason: &str,
    message: &str,
) -> bool {
    match current {
        None => true,
        Some(status) => {
            status.ready
                || status.failure_reason.as_deref() != Some(reason)
                || status.failure_message.as_deref() != Some(message)
        }
    }
}

/// Status patch recording a terminal failure
///
/// The machine is left intact; `ready` is forced to false so the owner does
/// not treat a failed host as usable.
pub fn failure_status_patch(machine: &TinkerbellMachine, reason: &str, message: &str) -> Value {
    json!({
        "metadata": { "resourceVersion": machine.resource_version() },
        "status": {
            "ready": false,
            "failureReason": reason,
            "failureMessage": message,
            "lastUpdated": chrono::Utc::now(),
        }
    })
}
