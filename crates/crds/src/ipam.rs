//! Cluster API IPAM contract types
//!
//! `IPAddressClaim` is created by the machine controller; the IPAM provider
//! answers with an `IPAddress` and records it in the claim status.

use crate::references::{LocalObjectReference, TypedLocalObjectReference};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Guard token on claims created by the machine controller
pub const IP_CLAIM_FINALIZER: &str = "ipam.cluster.x-k8s.io/protect-claim";

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[kube(
    group = "ipam.cluster.x-k8s.io",
    version = "v1beta1",
    kind = "IPAddressClaim",
    namespaced,
    status = "IPAddressClaimStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct IPAddressClaimSpec {
    /// Pool to allocate from
    pub pool_ref: TypedLocalObjectReference,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct IPAddressClaimStatus {
    /// Granted IPAddress, once allocated
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address_ref: Option<LocalObjectReference>,
}

impl IPAddressClaim {
    /// Name of the granted IPAddress
    pub fn granted_address(&self) -> Option<&str> {
        self.status
            .as_ref()
            .and_then(|s| s.address_ref.as_ref())
            .map(|r| r.name.as_str())
            .filter(|n| !n.is_empty())
    }
}

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[kube(
    group = "ipam.cluster.x-k8s.io",
    version = "v1beta1",
    kind = "IPAddress",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct IPAddressSpec {
    /// Claim this address was granted to
    pub claim_ref: LocalObjectReference,

    /// Pool the address came from
    pub pool_ref: TypedLocalObjectReference,

    /// The address, without prefix length
    pub address: String,

    /// Prefix length
    pub prefix: i32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway: Option<String>,
}
