//! InfraClient trait for mocking
//!
//! This trait abstracts every object-store read and write the machine
//! controller performs. The concrete `InfraClient` talks to the Kubernetes
//! API; tests use the in-memory `MockInfraClient`.
//!
//! Conventions:
//! - `get_*` returns `Ok(None)` when the object does not exist.
//! - `create_*` returns `InfraError::AlreadyExists` when the name is taken.
//! - `delete_*` returns `Ok(false)` when the object was already gone.
//! - `patch_*` applies a JSON merge patch. A `metadata.resourceVersion` in the
//!   patch makes the write conditional; a stale version yields
//!   `InfraError::Conflict`.

use crate::error::InfraError;
use crds::{
    Cluster, Hardware, IPAddress, IPAddressClaim, Job, Machine, Template, TinkerbellCluster,
    TinkerbellMachine, Workflow,
};
use k8s_openapi::api::core::v1::Secret;
use serde_json::Value;

/// Trait for object-store operations used by the machine controller
///
/// All async methods must be `Send` to work with Tokio's work-stealing runtime.
#[async_trait::async_trait]
pub trait InfraClientTrait: Send + Sync {
    // TinkerbellMachine
    async fn get_tinkerbell_machine(&self, namespace: &str, name: &str) -> Result<Option<TinkerbellMachine>, InfraError>;
    async fn patch_tinkerbell_machine(&self, namespace: &str, name: &str, patch: &Value) -> Result<TinkerbellMachine, InfraError>;
    async fn patch_tinkerbell_machine_status(&self, namespace: &str, name: &str, patch: &Value) -> Result<TinkerbellMachine, InfraError>;

    // Cluster API (read-only)
    async fn get_machine(&self, namespace: &str, name: &str) -> Result<Option<Machine>, InfraError>;
    async fn get_cluster(&self, namespace: &str, name: &str) -> Result<Option<Cluster>, InfraError>;
    async fn get_tinkerbell_cluster(&self, namespace: &str, name: &str) -> Result<Option<TinkerbellCluster>, InfraError>;
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, InfraError>;

    // Hardware
    async fn get_hardware(&self, namespace: &str, name: &str) -> Result<Option<Hardware>, InfraError>;
    async fn list_hardware(&self, namespace: &str, label_selector: Option<&str>) -> Result<Vec<Hardware>, InfraError>;
    async fn patch_hardware(&self, namespace: &str, name: &str, patch: &Value) -> Result<Hardware, InfraError>;

    // Tinkerbell Template / Workflow
    async fn get_template(&self, namespace: &str, name: &str) -> Result<Option<Template>, InfraError>;
    async fn create_template(&self, template: &Template) -> Result<Template, InfraError>;
    async fn delete_template(&self, namespace: &str, name: &str) -> Result<bool, InfraError>;
    async fn get_workflow(&self, namespace: &str, name: &str) -> Result<Option<Workflow>, InfraError>;
    async fn create_workflow(&self, workflow: &Workflow) -> Result<Workflow, InfraError>;
    async fn delete_workflow(&self, namespace: &str, name: &str) -> Result<bool, InfraError>;

    // BMC Jobs
    async fn get_job(&self, namespace: &str, name: &str) -> Result<Option<Job>, InfraError>;
    async fn create_job(&self, job: &Job) -> Result<Job, InfraError>;

    // IPAM
    async fn get_ip_address_claim(&self, namespace: &str, name: &str) -> Result<Option<IPAddressClaim>, InfraError>;
    async fn create_ip_address_claim(&self, claim: &IPAddressClaim) -> Result<IPAddressClaim, InfraError>;
    async fn patch_ip_address_claim(&self, namespace: &str, name: &str, patch: &Value) -> Result<IPAddressClaim, InfraError>;
    async fn delete_ip_address_claim(&self, namespace: &str, name: &str) -> Result<bool, InfraError>;
    async fn get_ip_address(&self, namespace: &str, name: &str) -> Result<Option<IPAddress>, InfraError>;
}
