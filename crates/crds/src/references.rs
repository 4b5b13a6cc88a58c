//! Kubernetes object references shared by the machine CRDs
//!
//! Mirrors the upstream `TypedLocalObjectReference` / `ObjectReference` shapes
//! so the serialized form matches what Cluster API, Tinkerbell and the IPAM
//! providers write.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Typed reference to an object in the same namespace.
///
/// Used for the BMC machine on a Hardware and for the pool behind an
/// `IPAddressClaim`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct TypedLocalObjectReference {
    /// API group of the referenced resource (core group when absent)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_group: Option<String>,

    /// Kind of the referenced resource
    pub kind: String,

    /// Name of the referenced resource
    pub name: String,
}

impl TypedLocalObjectReference {
    /// Create a reference with apiGroup, kind and name
    pub fn new(api_group: impl Into<String>, kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            api_group: Some(api_group.into()),
            kind: kind.into(),
            name: name.into(),
        }
    }
}

/// Name-only reference to an object in the same namespace.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct LocalObjectReference {
    /// Name of the referenced resource
    pub name: String,
}

/// Cross-namespace object reference, as used by Cluster API.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ObjectReference {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}
