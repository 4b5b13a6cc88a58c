//! TinkerbellMachine CRD
//!
//! Infrastructure machine for Cluster API. One TinkerbellMachine is bound to
//! exactly one Hardware for its whole lifetime.

use crate::references::TypedLocalObjectReference;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// API group shared by the infrastructure resources
pub const INFRASTRUCTURE_GROUP: &str = "infrastructure.cluster.x-k8s.io";

/// Guard token placed on the TinkerbellMachine itself
pub const MACHINE_FINALIZER: &str = "tinkerbellmachine.infrastructure.cluster.x-k8s.io";

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[kube(
    group = "infrastructure.cluster.x-k8s.io",
    version = "v1beta1",
    kind = "TinkerbellMachine",
    namespaced,
    status = "TinkerbellMachineStatus",
    shortname = "tm"
)]
#[serde(rename_all = "camelCase")]
pub struct TinkerbellMachineSpec {
    /// Format string for the OS image URL.
    /// Placeholders: `{{.BaseRegistry}}`, `{{.OSDistro}}`, `{{.OSVersion}}`,
    /// `{{.KubernetesVersion}}`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_lookup_format: Option<String>,

    /// Base URL the OS images are served from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_lookup_base_registry: Option<String>,

    /// OS distribution used in the image URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_lookup_os_distro: Option<String>,

    /// OS version used in the image URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_lookup_os_version: Option<String>,

    /// Complete Tinkerbell template document; replaces the rendered default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_override: Option<String>,

    /// Provider identity, set once the machine is bound
    #[serde(default, rename = "providerID", skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<String>,

    /// Name of the bound Hardware, set once the machine is bound
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hardware_name: Option<String>,

    /// Constraints on which Hardware may be selected
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hardware_affinity: Option<HardwareAffinity>,

    /// How the host boots into the provisioning environment
    #[serde(default)]
    pub boot_options: BootOptions,

    /// Pool to request the primary interface address from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipam_pool_ref: Option<TypedLocalObjectReference>,
}

/// Hardware selection constraints
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HardwareAffinity {
    /// Terms ORed together; any one is sufficient.
    /// Empty means every unowned Hardware is a candidate.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required: Vec<HardwareAffinityTerm>,

    /// Weighted terms used to rank candidates
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub preferred: Vec<WeightedHardwareAffinityTerm>,
}

/// Selector over Hardware labels
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HardwareAffinityTerm {
    /// Label query over Hardware
    pub label_selector: LabelSelector,
}

/// Preferred term with a signed weight
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WeightedHardwareAffinityTerm {
    /// Added to the score of every candidate matching the term
    pub weight: i32,

    /// The term itself
    pub hardware_affinity_term: HardwareAffinityTerm,
}

/// Boot configuration
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BootOptions {
    /// Boot mode; netboot when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub boot_mode: Option<BootMode>,

    /// Base URL of the provisioning ISO (required for iso mode)
    #[serde(default, rename = "isoURL", skip_serializing_if = "Option::is_none")]
    pub iso_url: Option<String>,
}

/// How the host reaches the provisioning environment
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BootMode {
    /// DHCP/iPXE network boot
    #[default]
    Netboot,

    /// Virtual-media ISO boot through the BMC
    Iso,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TinkerbellMachineStatus {
    /// Machine finished provisioning
    #[serde(default)]
    pub ready: bool,

    /// Addresses reported for the bound Hardware
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub addresses: Vec<MachineAddress>,

    /// Instance state mirrored from the Hardware
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_status: Option<String>,

    /// Short machine-readable reason of a terminal failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,

    /// Human-readable description of a terminal failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_message: Option<String>,

    /// Last time the status changed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<chrono::DateTime<chrono::Utc>>,
}

/// Address of a machine
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MachineAddress {
    /// Address type
    #[serde(rename = "type")]
    pub address_type: MachineAddressType,

    /// The address
    pub address: String,
}

/// Cluster API address types
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub enum MachineAddressType {
    /// Host name
    Hostname,
    /// Address reachable inside the cluster network
    InternalIP,
    /// Address reachable from outside
    ExternalIP,
}
