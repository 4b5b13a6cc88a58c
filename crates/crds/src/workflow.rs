//! Tinkerbell Template and Workflow CRDs
//!
//! The controller creates one Template and one Workflow per machine, both
//! named after the machine, and only observes the workflow state afterwards.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[kube(
    group = "tinkerbell.org",
    version = "v1alpha1",
    kind = "Template",
    namespaced,
    status = "TemplateStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct TemplateSpec {
    /// Template document (YAML)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct TemplateStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
}

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[kube(
    group = "tinkerbell.org",
    version = "v1alpha1",
    kind = "Workflow",
    namespaced,
    status = "WorkflowStatus",
    shortname = "wf"
)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowSpec {
    /// Name of the Template to run
    pub template_ref: String,

    /// Name of the Hardware to run against
    pub hardware_ref: String,

    /// Values used to address the hardware from within task steps
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub hardware_map: BTreeMap<String, String>,

    /// How the workflow gets the host into the provisioning environment
    #[serde(default)]
    pub boot_options: WorkflowBootOptions,
}

/// Workflow boot options
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowBootOptions {
    /// Enable netboot on the hardware while the workflow runs
    #[serde(default)]
    pub toggle_allow_netboot: bool,

    /// Per-host ISO URL for iso boot
    #[serde(default, rename = "isoURL", skip_serializing_if = "Option::is_none")]
    pub iso_url: Option<String>,

    /// `netboot` or `isoboot`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub boot_mode: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowStatus {
    /// Overall workflow state
    #[serde(default)]
    pub state: WorkflowState,
}

/// Workflow state reported by the executor.
///
/// Success, failed and timeout are terminal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
pub enum WorkflowState {
    #[default]
    #[serde(rename = "STATE_PENDING")]
    Pending,

    #[serde(rename = "STATE_RUNNING")]
    Running,

    #[serde(rename = "STATE_SUCCESS")]
    Success,

    #[serde(rename = "STATE_FAILED")]
    Failed,

    #[serde(rename = "STATE_TIMEOUT")]
    Timeout,

    /// Any state this controller does not know; handled like pending
    #[serde(other)]
    Unknown,
}

impl WorkflowState {
    /// Whether the state can no longer change
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Failed | Self::Timeout)
    }
}

impl Workflow {
    /// Observed state; pending until the executor reports one
    pub fn state(&self) -> WorkflowState {
        self.status.as_ref().map(|s| s.state).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workflow_state_deserializes_executor_values() {
        let state: WorkflowState = serde_json::from_str("\"STATE_SUCCESS\"").unwrap();
        assert_eq!(state, WorkflowState::Success);
        assert!(state.is_terminal());

        let state: WorkflowState = serde_json::from_str("\"STATE_RUNNING\"").unwrap();
        assert!(!state.is_terminal());

        let state: WorkflowState = serde_json::from_str("\"STATE_SOMETHING_NEW\"").unwrap();
        assert_eq!(state, WorkflowState::Unknown);
        assert!(!state.is_terminal());
    }
}
