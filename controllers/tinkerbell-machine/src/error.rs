//! Controller-specific error types.
//!
//! This module defines error types specific to the Tinkerbell machine
//! controller that are not covered by upstream library errors.
//!
//! Errors fall into two groups. Transient errors (object-store failures and
//! optimistic-concurrency conflicts) are retried with backoff. Terminal
//! domain failures (failed workflows or power jobs, malformed hardware,
//! invalid boot options) are surfaced on the machine status and left for an
//! operator to resolve.

use infra_client::InfraError;
use kube::core::ParseExpressionError;
use thiserror::Error;

/// Errors that can occur in the Tinkerbell machine controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Object-store error
    #[error("Object store error: {0}")]
    Infra(#[from] InfraError),

    /// No unowned hardware satisfies the machine's affinity
    #[error("No hardware available: {0}")]
    NoHardwareAvailable(String),

    /// Workflow reported STATE_FAILED
    #[error("Workflow {0} failed")]
    WorkflowFailed(String),

    /// Workflow reported STATE_TIMEOUT
    #[error("Workflow {0} timed out")]
    WorkflowTimeout(String),

    /// BMC job reported a failed condition
    #[error("BMC job {job} failed: {message}")]
    PowerJobFailed { job: String, message: String },

    /// Hardware record cannot be provisioned
    #[error("Invalid hardware {0}")]
    InvalidHardware(String),

    /// Boot mode combination is not usable
    #[error("Invalid boot options: {0}")]
    InvalidBootOptions(String),

    /// Hardware affinity selector cannot be evaluated
    #[error("Invalid hardware affinity: {0}")]
    InvalidSelector(#[from] ParseExpressionError),

    /// Granted IP address cannot be applied
    #[error("Invalid IP address: {0}")]
    InvalidAddress(String),

    /// Task definition could not be rendered
    #[error("Template render failed: {0}")]
    TemplateRender(#[from] serde_yaml::Error),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Resource watch failed
    #[error("Resource watch failed: {0}")]
    Watch(String),
}

impl ControllerError {
    /// Whether the error is an optimistic-concurrency conflict
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Infra(e) if e.is_conflict())
    }

    /// Whether retrying the same pass can succeed without outside intervention
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Infra(_) | Self::NoHardwareAvailable(_) | Self::Watch(_))
    }

    /// Short machine-readable reason, used for status and metric labels
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Infra(e) if e.is_conflict() => "Conflict",
            Self::Infra(_) => "ObjectStoreError",
            Self::NoHardwareAvailable(_) => "NoHardwareAvailable",
            Self::WorkflowFailed(_) => "WorkflowFailed",
            Self::WorkflowTimeout(_) => "WorkflowTimeout",
            Self::PowerJobFailed { .. } => "PowerJobFailed",
            Self::InvalidHardware(_) => "InvalidHardware",
            Self::InvalidBootOptions(_) => "InvalidBootOptions",
            Self::InvalidSelector(_) => "InvalidHardwareAffinity",
            Self::InvalidAddress(_) => "InvalidIPAddress",
            Self::TemplateRender(_) => "TemplateRenderFailed",
            Self::InvalidConfig(_) => "InvalidConfiguration",
            Self::Watch(_) => "WatchFailed",
        }
    }
}
