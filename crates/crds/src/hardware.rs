//! Tinkerbell Hardware CRD
//!
//! Inventory record for one physical or virtual host. Hardware is never
//! created or deleted by the machine controller; it is claimed through the
//! owner labels below and released again on machine deletion.

use crate::references::TypedLocalObjectReference;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Label recording the name of the owning TinkerbellMachine
pub const HARDWARE_OWNER_NAME_LABEL: &str = "v1alpha1.tinkerbell.org/ownerName";

/// Label recording the namespace of the owning TinkerbellMachine
pub const HARDWARE_OWNER_NAMESPACE_LABEL: &str = "v1alpha1.tinkerbell.org/ownerNamespace";

/// Annotation marking Hardware that already completed provisioning
pub const HARDWARE_PROVISIONED_ANNOTATION: &str = "v1alpha1.tinkerbell.org/provisioned";

/// Guard token the machine controller places on claimed Hardware
pub const HARDWARE_FINALIZER: &str = "tinkerbellmachine.infrastructure.cluster.x-k8s.io";

/// `metadata.state` once the host runs its provisioned OS
pub const HARDWARE_STATE_IN_USE: &str = "in_use";

/// `metadata.instance.state` once the host runs its provisioned OS
pub const INSTANCE_STATE_PROVISIONED: &str = "provisioned";

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[kube(
    group = "tinkerbell.org",
    version = "v1alpha1",
    kind = "Hardware",
    namespaced,
    status = "HardwareStatus",
    shortname = "hw"
)]
#[serde(rename_all = "camelCase")]
pub struct HardwareSpec {
    /// BMC machine (bmc.tinkerbell.org Machine) for out-of-band power control
    #[serde(default, rename = "bmcRef", skip_serializing_if = "Option::is_none")]
    pub bmc_ref: Option<TypedLocalObjectReference>,

    /// Network interfaces; the first one is the primary interface
    #[serde(default)]
    pub interfaces: Vec<Interface>,

    /// Block devices; the first one receives the OS image
    #[serde(default)]
    pub disks: Vec<Disk>,

    /// Free-form instance metadata
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HardwareMetadata>,

    /// Bootstrap data served to the host
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_data: Option<String>,
}

/// Network interface
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Interface {
    /// DHCP/address assignment record
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dhcp: Option<Dhcp>,

    /// Netboot permissions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub netboot: Option<Netboot>,

    /// Inventory fields this controller does not interpret
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Address assignment for an interface
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Dhcp {
    /// Hardware address, `aa:bb:cc:dd:ee:ff`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mac: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<Ip>,

    /// Host boots in UEFI mode
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uefi: Option<bool>,

    /// Inventory fields this controller does not interpret (arch, lease time, name servers, ...)
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// IPv4 configuration of an interface
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Ip {
    #[serde(default)]
    pub address: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub netmask: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway: Option<String>,

    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Netboot permissions
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
pub struct Netboot {
    #[serde(default, rename = "allowPXE", skip_serializing_if = "Option::is_none")]
    pub allow_pxe: Option<bool>,

    #[serde(default, rename = "allowWorkflow", skip_serializing_if = "Option::is_none")]
    pub allow_workflow: Option<bool>,

    /// iPXE and OSIE overrides are passed through untouched
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Block device
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Disk {
    /// Device path, e.g. `/dev/sda`
    #[serde(default)]
    pub device: String,
}

/// Lifecycle metadata of a host
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HardwareMetadata {
    /// Host lifecycle state (e.g. `in_use`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance: Option<MetadataInstance>,
}

/// Instance metadata
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MetadataInstance {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,

    /// Instance state (e.g. `provisioned`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct HardwareStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
}

impl Hardware {
    /// Primary (first) interface
    pub fn primary_interface(&self) -> Option<&Interface> {
        self.spec.interfaces.first()
    }

    /// DHCP record of the primary interface
    pub fn primary_dhcp(&self) -> Option<&Dhcp> {
        self.primary_interface().and_then(|i| i.dhcp.as_ref())
    }

    /// MAC of the primary interface
    pub fn primary_mac(&self) -> Option<&str> {
        self.primary_dhcp().and_then(|d| d.mac.as_deref()).filter(|m| !m.is_empty())
    }

    /// Non-empty address configured on the primary interface
    pub fn primary_address(&self) -> Option<&str> {
        self.primary_dhcp()
            .and_then(|d| d.ip.as_ref())
            .map(|ip| ip.address.as_str())
            .filter(|a| !a.is_empty())
    }

    /// Whether the host has an out-of-band power-control endpoint
    pub fn has_bmc(&self) -> bool {
        self.spec.bmc_ref.as_ref().is_some_and(|r| !r.name.is_empty())
    }

    /// Whether the provisioned marker annotation is present
    pub fn is_provisioned(&self) -> bool {
        self.metadata
            .annotations
            .as_ref()
            .is_some_and(|a| a.contains_key(HARDWARE_PROVISIONED_ANNOTATION))
    }

    /// Owner name label, if claimed
    pub fn owner_name(&self) -> Option<&str> {
        self.metadata
            .labels
            .as_ref()
            .and_then(|l| l.get(HARDWARE_OWNER_NAME_LABEL))
            .map(String::as_str)
    }

    /// Whether the owner labels name the given machine
    pub fn is_owned_by(&self, name: &str, namespace: &str) -> bool {
        let labels = self.metadata.labels.as_ref();
        labels.and_then(|l| l.get(HARDWARE_OWNER_NAME_LABEL)).map(String::as_str) == Some(name)
            && labels
                .and_then(|l| l.get(HARDWARE_OWNER_NAMESPACE_LABEL))
                .map(String::as_str)
                == Some(namespace)
    }

    /// Whether the primary interface boots in UEFI mode
    pub fn uses_uefi(&self) -> bool {
        self.primary_dhcp().and_then(|d| d.uefi).unwrap_or(false)
    }
}
