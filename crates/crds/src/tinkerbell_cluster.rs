//! TinkerbellCluster CRD
//!
//! Read by the machine controller for cluster-wide image lookup defaults.
//! The cluster endpoint itself is reconciled elsewhere.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[kube(
    group = "infrastructure.cluster.x-k8s.io",
    version = "v1beta1",
    kind = "TinkerbellCluster",
    namespaced,
    status = "TinkerbellClusterStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct TinkerbellClusterSpec {
    /// API endpoint of the workload cluster
    #[serde(default)]
    pub control_plane_endpoint: ApiEndpoint,

    /// Default image URL format for machines in this cluster
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_lookup_format: Option<String>,

    /// Default image base URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_lookup_base_registry: Option<String>,

    /// Default OS distribution
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_lookup_os_distro: Option<String>,

    /// Default OS version
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_lookup_os_version: Option<String>,
}

/// Host/port pair
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ApiEndpoint {
    #[serde(default)]
    pub host: String,

    #[serde(default)]
    pub port: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct TinkerbellClusterStatus {
    /// Cluster infrastructure is ready
    #[serde(default)]
    pub ready: bool,
}
