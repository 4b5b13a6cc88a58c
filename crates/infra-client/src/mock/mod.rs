//! Mock InfraClient for unit testing
//!
//! This module provides an in-memory implementation of `InfraClientTrait`
//! that behaves like the API server where the controller depends on it:
//! - every write bumps a store-wide `resourceVersion`
//! - a patch carrying `metadata.resourceVersion` fails with `Conflict` when stale
//! - deleting an object with finalizers only sets `deletionTimestamp`; the
//!   object disappears once a later patch empties its finalizers
//! - list honours simple equality label selectors

mod merge;

use crate::error::InfraError;
use crate::infra_trait::InfraClientTrait;
use crds::{
    Cluster, Hardware, IPAddress, IPAddressClaim, Job, JobCondition, JobConditionType, JobStatus,
    LocalObjectReference, Machine, Template, TinkerbellCluster, TinkerbellMachine, Workflow,
    WorkflowState, WorkflowStatus,
};
use k8s_openapi::api::core::v1::Secret;
use kube::{Resource, ResourceExt};
use merge::{merge_patch, selector_matches};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

type Key = (String, String);

/// One object kind in the mock store
#[derive(Debug)]
pub(crate) struct Table<K> {
    objects: Mutex<BTreeMap<Key, K>>,
}

impl<K> Default for Table<K> {
    fn default() -> Self {
        Self {
            objects: Mutex::new(BTreeMap::new()),
        }
    }
}

impl<K: Clone> Table<K> {
    fn lock(&self) -> MutexGuard<'_, BTreeMap<Key, K>> {
        self.objects.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn get(&self, namespace: &str, name: &str) -> Option<K> {
        self.lock().get(&(namespace.to_string(), name.to_string())).cloned()
    }
}

/// Mock InfraClient for testing
///
/// Clones share the same store, so a test can keep a handle while the
/// reconciler owns another.
#[derive(Clone, Default)]
pub struct MockInfraClient {
    pub(crate) tinkerbell_machines: Arc<Table<TinkerbellMachine>>,
    pub(crate) machines: Arc<Table<Machine>>,
    pub(crate) clusters: Arc<Table<Cluster>>,
    pub(crate) tinkerbell_clusters: Arc<Table<TinkerbellCluster>>,
    pub(crate) secrets: Arc<Table<Secret>>,
    pub(crate) hardware: Arc<Table<Hardware>>,
    pub(crate) templates: Arc<Table<Template>>,
    pub(crate) workflows: Arc<Table<Workflow>>,
    pub(crate) jobs: Arc<Table<Job>>,
    pub(crate) ip_address_claims: Arc<Table<IPAddressClaim>>,
    pub(crate) ip_addresses: Arc<Table<IPAddress>>,
    // Store-wide resourceVersion counter
    resource_version: Arc<AtomicU64>,
    // Successful create/patch/delete calls
    writes: Arc<AtomicUsize>,
}

impl std::fmt::Debug for MockInfraClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockInfraClient")
            .field("writes", &self.writes.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

fn key_of<K: Resource>(object: &K) -> Result<Key, InfraError> {
    let meta = object.meta();
    let name = meta
        .name
        .clone()
        .ok_or_else(|| InfraError::InvalidRequest("object has no name".to_string()))?;
    let namespace = meta
        .namespace
        .clone()
        .ok_or_else(|| InfraError::InvalidRequest(format!("{} has no namespace", name)))?;
    Ok((namespace, name))
}

fn finalizers_empty(value: &Value) -> bool {
    value
        .pointer("/metadata/finalizers")
        .and_then(Value::as_array)
        .is_none_or(Vec::is_empty)
}

impl MockInfraClient {
    /// Create an empty mock store
    pub fn new() -> Self {
        Self {
            resource_version: Arc::new(AtomicU64::new(1)),
            ..Default::default()
        }
    }

    /// Number of successful writes (create, patch, delete) so far
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn next_resource_version(&self) -> String {
        (self.resource_version.fetch_add(1, Ordering::SeqCst) + 1).to_string()
    }

    fn insert<K: Resource + Clone>(&self, table: &Table<K>, mut object: K) {
        if let Ok(key) = key_of(&object) {
            object.meta_mut().resource_version = Some(self.next_resource_version());
            table.lock().insert(key, object);
        }
    }

    fn create_in<K: Resource + Clone>(&self, table: &Table<K>, object: &K) -> Result<K, InfraError> {
        let key = key_of(object)?;
        let mut objects = table.lock();
        if objects.contains_key(&key) {
            return Err(InfraError::AlreadyExists(format!("{}/{}", key.0, key.1)));
        }
        let mut created = object.clone();
        created.meta_mut().resource_version = Some(self.next_resource_version());
        created.meta_mut().uid = Some(format!("uid-{}-{}", key.0, key.1));
        objects.insert(key, created.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(created)
    }

    fn patch_in<K>(&self, table: &Table<K>, namespace: &str, name: &str, patch: &Value) -> Result<K, InfraError>
    where
        K: Resource + Clone + Serialize + DeserializeOwned,
    {
        let key = (namespace.to_string(), name.to_string());
        let mut objects = table.lock();
        let current = objects
            .get(&key)
            .ok_or_else(|| InfraError::NotFound(format!("{}/{}", namespace, name)))?;

        if let Some(expected) = patch.pointer("/metadata/resourceVersion").and_then(Value::as_str) {
            if current.meta().resource_version.as_deref() != Some(expected) {
                return Err(InfraError::Conflict(format!(
                    "{}/{}: resourceVersion {} is stale",
                    namespace, name, expected
                )));
            }
        }

        let mut value = serde_json::to_value(current)?;
        merge_patch(&mut value, patch);
        let deleting = value.pointer("/metadata/deletionTimestamp").is_some_and(|v| !v.is_null());
        let mut patched: K = serde_json::from_value(value.clone())?;
        patched.meta_mut().resource_version = Some(self.next_resource_version());

        if deleting && finalizers_empty(&value) {
            objects.remove(&key);
        } else {
            objects.insert(key, patched.clone());
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(patched)
    }

    fn delete_from<K>(&self, table: &Table<K>, namespace: &str, name: &str) -> Result<bool, InfraError>
    where
        K: Resource + Clone + Serialize + DeserializeOwned,
    {
        let key = (namespace.to_string(), name.to_string());
        let mut objects = table.lock();
        let Some(current) = objects.get(&key) else {
            return Ok(false);
        };
        if current.finalizers().is_empty() {
            objects.remove(&key);
        } else {
            let mut value = serde_json::to_value(current)?;
            merge_patch(
                &mut value,
                &json!({"metadata": {"deletionTimestamp": "2024-01-01T00:00:00Z"}}),
            );
            let mut marked: K = serde_json::from_value(value)?;
            marked.meta_mut().resource_version = Some(self.next_resource_version());
            objects.insert(key, marked);
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(true)
    }

    /// Add a TinkerbellMachine to the mock store (for test setup)
    pub fn add_tinkerbell_machine(&self, machine: TinkerbellMachine) {
        self.insert(&self.tinkerbell_machines, machine);
    }

    /// Add a Cluster API Machine to the mock store (for test setup)
    pub fn add_machine(&self, machine: Machine) {
        self.insert(&self.machines, machine);
    }

    /// Add a Cluster API Cluster to the mock store (for test setup)
    pub fn add_cluster(&self, cluster: Cluster) {
        self.insert(&self.clusters, cluster);
    }

    /// Add a TinkerbellCluster to the mock store (for test setup)
    pub fn add_tinkerbell_cluster(&self, cluster: TinkerbellCluster) {
        self.insert(&self.tinkerbell_clusters, cluster);
    }

    /// Add a Secret to the mock store (for test setup)
    pub fn add_secret(&self, secret: Secret) {
        self.insert(&self.secrets, secret);
    }

    /// Add a Hardware to the mock store (for test setup)
    pub fn add_hardware(&self, hardware: Hardware) {
        self.insert(&self.hardware, hardware);
    }

    /// Add an IPAddress to the mock store (for test setup)
    pub fn add_ip_address(&self, address: IPAddress) {
        self.insert(&self.ip_addresses, address);
    }

    /// Report a workflow state, as the workflow executor would
    pub fn set_workflow_state(&self, namespace: &str, name: &str, state: WorkflowState) {
        if let Some(mut workflow) = self.workflows.get(namespace, name) {
            workflow.status = Some(WorkflowStatus { state });
            self.insert(&self.workflows, workflow);
        }
    }

    /// Report BMC job conditions, as the power controller would
    pub fn set_job_conditions(&self, namespace: &str, name: &str, completed: bool, failed: bool) {
        if let Some(mut job) = self.jobs.get(namespace, name) {
            let condition = |condition_type, set: bool| JobCondition {
                condition_type,
                status: if set { "True" } else { "False" }.to_string(),
                message: (set && condition_type == JobConditionType::Failed)
                    .then(|| "power action failed".to_string()),
            };
            job.status = Some(JobStatus {
                conditions: vec![
                    condition(JobConditionType::Completed, completed),
                    condition(JobConditionType::Failed, failed),
                ],
            });
            self.insert(&self.jobs, job);
        }
    }

    /// Record a granted address on a claim, as an IPAM provider would
    pub fn grant_ip_address_claim(&self, namespace: &str, claim_name: &str, address_name: &str) {
        if let Some(mut claim) = self.ip_address_claims.get(namespace, claim_name) {
            let mut status = claim.status.take().unwrap_or_default();
            status.address_ref = Some(LocalObjectReference {
                name: address_name.to_string(),
            });
            claim.status = Some(status);
            self.insert(&self.ip_address_claims, claim);
        }
    }
}

#[async_trait::async_trait]
impl InfraClientTrait for MockInfraClient {
    async fn get_tinkerbell_machine(&self, namespace: &str, name: &str) -> Result<Option<TinkerbellMachine>, InfraError> {
        Ok(self.tinkerbell_machines.get(namespace, name))
    }

    async fn patch_tinkerbell_machine(&self, namespace: &str, name: &str, patch: &Value) -> Result<TinkerbellMachine, InfraError> {
        self.patch_in(&self.tinkerbell_machines, namespace, name, patch)
    }

    async fn patch_tinkerbell_machine_status(&self, namespace: &str, name: &str, patch: &Value) -> Result<TinkerbellMachine, InfraError> {
        // Status subresource: only the status stanza and the precondition are applied
        let mut status_only = json!({"status": patch.get("status").cloned().unwrap_or(Value::Null)});
        if let Some(rv) = patch.pointer("/metadata/resourceVersion") {
            status_only["metadata"] = json!({"resourceVersion": rv});
        }
        self.patch_in(&self.tinkerbell_machines, namespace, name, &status_only)
    }

    async fn get_machine(&self, namespace: &str, name: &str) -> Result<Option<Machine>, InfraError> {
        Ok(self.machines.get(namespace, name))
    }

    async fn get_cluster(&self, namespace: &str, name: &str) -> Result<Option<Cluster>, InfraError> {
        Ok(self.clusters.get(namespace, name))
    }

    async fn get_tinkerbell_cluster(&self, namespace: &str, name: &str) -> Result<Option<TinkerbellCluster>, InfraError> {
        Ok(self.tinkerbell_clusters.get(namespace, name))
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, InfraError> {
        Ok(self.secrets.get(namespace, name))
    }

    async fn get_hardware(&self, namespace: &str, name: &str) -> Result<Option<Hardware>, InfraError> {
        Ok(self.hardware.get(namespace, name))
    }

    async fn list_hardware(&self, namespace: &str, label_selector: Option<&str>) -> Result<Vec<Hardware>, InfraError> {
        Ok(self
            .hardware
            .lock()
            .iter()
            .filter(|((ns, _), _)| ns == namespace)
            .map(|(_, hw)| hw)
            .filter(|hw| label_selector.is_none_or(|s| selector_matches(s, hw.labels())))
            .cloned()
            .collect())
    }

    async fn patch_hardware(&self, namespace: &str, name: &str, patch: &Value) -> Result<Hardware, InfraError> {
        self.patch_in(&self.hardware, namespace, name, patch)
    }

    async fn get_template(&self, namespace: &str, name: &str) -> Result<Option<Template>, InfraError> {
        Ok(self.templates.get(namespace, name))
    }

    async fn create_template(&self, template: &Template) -> Result<Template, InfraError> {
        self.create_in(&self.templates, template)
    }

    async fn delete_template(&self, namespace: &str, name: &str) -> Result<bool, InfraError> {
        self.delete_from(&self.templates, namespace, name)
    }

    async fn get_workflow(&self, namespace: &str, name: &str) -> Result<Option<Workflow>, InfraError> {
        Ok(self.workflows.get(namespace, name))
    }

    async fn create_workflow(&self, workflow: &Workflow) -> Result<Workflow, InfraError> {
        self.create_in(&self.workflows, workflow)
    }

    async fn delete_workflow(&self, namespace: &str, name: &str) -> Result<bool, InfraError> {
        self.delete_from(&self.workflows, namespace, name)
    }

    async fn get_job(&self, namespace: &str, name: &str) -> Result<Option<Job>, InfraError> {
        Ok(self.jobs.get(namespace, name))
    }

    async fn create_job(&self, job: &Job) -> Result<Job, InfraError> {
        self.create_in(&self.jobs, job)
    }

    async fn get_ip_address_claim(&self, namespace: &str, name: &str) -> Result<Option<IPAddressClaim>, InfraError> {
        Ok(self.ip_address_claims.get(namespace, name))
    }

    async fn create_ip_address_claim(&self, claim: &IPAddressClaim) -> Result<IPAddressClaim, InfraError> {
        self.create_in(&self.ip_address_claims, claim)
    }

    async fn patch_ip_address_claim(&self, namespace: &str, name: &str, patch: &Value) -> Result<IPAddressClaim, InfraError> {
        self.patch_in(&self.ip_address_claims, namespace, name, patch)
    }

    async fn delete_ip_address_claim(&self, namespace: &str, name: &str) -> Result<bool, InfraError> {
        self.delete_from(&self.ip_address_claims, namespace, name)
    }

    async fn get_ip_address(&self, namespace: &str, name: &str) -> Result<Option<IPAddress>, InfraError> {
        Ok(self.ip_addresses.get(namespace, name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn hardware(name: &str, labels: &[(&str, &str)]) -> Hardware {
        Hardware {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("default".to_string()),
                labels: Some(labels.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()),
                ..Default::default()
            },
            spec: Default::default(),
            status: None,
        }
    }

    #[tokio::test]
    async fn test_stale_resource_version_conflicts() {
        let mock = MockInfraClient::new();
        mock.add_hardware(hardware("hw-0", &[]));
        let seen = mock.get_hardware("default", "hw-0").await.unwrap().unwrap();
        let rv = seen.resource_version().unwrap();

        let first = json!({"metadata": {"resourceVersion": rv, "labels": {"owner": "a"}}});
        mock.patch_hardware("default", "hw-0", &first).await.unwrap();

        let second = json!({"metadata": {"resourceVersion": rv, "labels": {"owner": "b"}}});
        let err = mock.patch_hardware("default", "hw-0", &second).await.unwrap_err();
        assert!(err.is_conflict());

        let stored = mock.get_hardware("default", "hw-0").await.unwrap().unwrap();
        assert_eq!(stored.labels().get("owner").map(String::as_str), Some("a"));
    }

    #[tokio::test]
    async fn test_list_hardware_filters_by_selector() {
        let mock = MockInfraClient::new();
        mock.add_hardware(hardware("hw-0", &[("owner", "m1")]));
        mock.add_hardware(hardware("hw-1", &[]));

        let owned = mock.list_hardware("default", Some("owner=m1")).await.unwrap();
        assert_eq!(owned.len(), 1);
        assert_eq!(owned[0].name_any(), "hw-0");

        let all = mock.list_hardware("default", None).await.unwrap();
        assert_eq!(all.len(), 2);
        assert!(mock.list_hardware("other", None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_waits_for_finalizers() {
        let mock = MockInfraClient::new();
        let mut hw = hardware("hw-0", &[]);
        hw.metadata.finalizers = Some(vec!["guard".to_string()]);
        mock.add_hardware(hw);

        let mut template = Template::new("t", Default::default());
        template.metadata.namespace = Some("default".to_string());
        mock.create_template(&template).await.unwrap();
        assert!(matches!(
            mock.create_template(&template).await,
            Err(InfraError::AlreadyExists(_))
        ));
        assert!(mock.delete_template("default", "t").await.unwrap());
        assert!(!mock.delete_template("default", "t").await.unwrap());

        assert!(mock.delete_from(&mock.hardware, "default", "hw-0").unwrap());
        let marked = mock.get_hardware("default", "hw-0").await.unwrap().unwrap();
        assert!(marked.metadata.deletion_timestamp.is_some());

        mock.patch_hardware("default", "hw-0", &json!({"metadata": {"finalizers": []}}))
            .await
            .unwrap();
        assert!(mock.get_hardware("default", "hw-0").await.unwrap().is_none());
    }
}
