//! Rufio BMC Job CRD
//!
//! An ordered list of power and boot-device actions executed by the
//! out-of-band power controller against a BMC machine.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[kube(
    group = "bmc.tinkerbell.org",
    version = "v1alpha1",
    kind = "Job",
    namespaced,
    status = "JobStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct JobSpec {
    /// BMC machine the tasks run against
    pub machine_ref: MachineRef,

    /// Tasks executed in order
    pub tasks: Vec<Action>,
}

/// Reference to a BMC machine
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MachineRef {
    pub name: String,
    pub namespace: String,
}

/// One BMC task; exactly one field is set
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Action {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub power_action: Option<PowerAction>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub one_time_boot_device_action: Option<OneTimeBootDeviceAction>,
}

impl Action {
    /// Power task
    pub fn power(action: PowerAction) -> Self {
        Self {
            power_action: Some(action),
            one_time_boot_device_action: None,
        }
    }

    /// One-time boot device task
    pub fn boot_device(device: BootDevice, efi_boot: bool) -> Self {
        Self {
            power_action: None,
            one_time_boot_device_action: Some(OneTimeBootDeviceAction {
                device: vec![device],
                efi_boot,
            }),
        }
    }
}

/// Power state change
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PowerAction {
    /// Power on
    On,
    /// Hard power off
    Off,
    /// Graceful power off
    Soft,
    /// Power cycle
    Cycle,
    /// Warm reset
    Reset,
    /// Query power state
    Status,
}

/// Next-boot device override
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OneTimeBootDeviceAction {
    pub device: Vec<BootDevice>,

    /// Boot the device in EFI mode
    #[serde(default, rename = "efiBoot")]
    pub efi_boot: bool,
}

/// Boot devices understood by the BMC controller
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BootDevice {
    Pxe,
    Disk,
    Bios,
    Cdrom,
    Safe,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct JobStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<JobCondition>,
}

/// Job condition
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct JobCondition {
    #[serde(rename = "type")]
    pub condition_type: JobConditionType,

    /// `True` or `False`
    pub status: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Job condition types
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub enum JobConditionType {
    Running,
    Completed,
    Failed,
}

impl Job {
    fn has_condition(&self, condition_type: JobConditionType) -> bool {
        self.status.as_ref().is_some_and(|s| {
            s.conditions
                .iter()
                .any(|c| c.condition_type == condition_type && c.status == "True")
        })
    }

    /// All tasks finished successfully
    pub fn is_completed(&self) -> bool {
        self.has_condition(JobConditionType::Completed)
    }

    /// A task failed
    pub fn is_failed(&self) -> bool {
        self.has_condition(JobConditionType::Failed)
    }

    /// Message of the failed condition, if any
    pub fn failure_message(&self) -> Option<&str> {
        self.status.as_ref().and_then(|s| {
            s.conditions
                .iter()
                .find(|c| c.condition_type == JobConditionType::Failed)
                .and_then(|c| c.message.as_deref())
        })
    }
}
