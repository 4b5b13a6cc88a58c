//! Owner readiness gates.
//!
//! A TinkerbellMachine is only acted on once its owning Cluster API Machine
//! exists, the Cluster is neither paused nor waiting for infrastructure, and
//! bootstrap data has been generated. Any missing input is "not ready": the
//! pass ends without error and is retried after the bootstrap requeue delay.

use super::Reconciler;
use crate::error::ControllerError;
use crate::reconcile_helpers::object_key;
use crds::{Cluster, Machine, TinkerbellCluster, TinkerbellMachine, CLUSTER_NAME_LABEL, PAUSED_ANNOTATION};
use kube::ResourceExt;
use tracing::{debug, info};

/// Secret key holding the bootstrap data
pub const BOOTSTRAP_DATA_KEY: &str = "value";

const CAPI_GROUP_PREFIX: &str = "cluster.x-k8s.io/";

/// Inputs gathered from the owner chain for one pass
#[derive(Debug, Clone)]
pub struct MachineScope {
    /// Owning Cluster API Machine
    pub machine: Machine,
    /// Name of the owning cluster
    pub cluster_name: String,
    /// Rendered bootstrap data (cloud-init)
    pub bootstrap_data: String,
    /// Cluster-wide image lookup defaults, when the cluster has a TinkerbellCluster
    pub tinkerbell_cluster: Option<TinkerbellCluster>,
}

impl MachineScope {
    /// Kubernetes version requested by the owning Machine
    pub fn kubernetes_version(&self) -> Option<&str> {
        self.machine.spec.version.as_deref()
    }
}

/// Name of the owning Cluster API Machine, from the owner references
pub fn owner_machine_name(machine: &TinkerbellMachine) -> Option<String> {
    machine
        .owner_references()
        .iter()
        .find(|r| r.kind == "Machine" && r.api_version.starts_with(CAPI_GROUP_PREFIX))
        .map(|r| r.name.clone())
}

/// Whether reconciliation of the cluster is paused
pub fn is_paused(cluster: &Cluster) -> bool {
    cluster.spec.paused || cluster.annotations().contains_key(PAUSED_ANNOTATION)
}

impl Reconciler {
    /// Gathers the owner chain, or `None` when any part of it is not ready yet.
    pub(crate) async fn machine_scope(
        &self,
        machine: &TinkerbellMachine,
    ) -> Result<Option<MachineScope>, ControllerError> {
        let key = object_key(machine);
        let namespace = machine.namespace().unwrap_or_default();

        let Some(owner_name) = owner_machine_name(machine) else {
            info!("TinkerbellMachine {} has no owner Machine yet", key);
            return Ok(None);
        };
        let Some(owner) = self.client.get_machine(&namespace, &owner_name).await? else {
            info!("Owner Machine {}/{} of TinkerbellMachine {} not found", namespace, owner_name, key);
            return Ok(None);
        };

        let cluster_name = if owner.spec.cluster_name.is_empty() {
            machine.labels().get(CLUSTER_NAME_LABEL).cloned().unwrap_or_default()
        } else {
            owner.spec.cluster_name.clone()
        };
        if cluster_name.is_empty() {
            info!("TinkerbellMachine {} has no cluster name", key);
            return Ok(None);
        }

        let Some(cluster) = self.client.get_cluster(&namespace, &cluster_name).await? else {
            info!("Cluster {}/{} of TinkerbellMachine {} not found", namespace, cluster_name, key);
            return Ok(None);
        };
        if is_paused(&cluster) {
            info!("Cluster {}/{} is paused, skipping TinkerbellMachine {}", namespace, cluster_name, key);
            return Ok(None);
        }
        if !cluster.status.as_ref().is_some_and(|s| s.infrastructure_ready) {
            info!("Cluster {}/{} infrastructure is not ready yet", namespace, cluster_name);
            return Ok(None);
        }

        let Some(secret_name) = owner
            .spec
            .bootstrap
            .data_secret_name
            .clone()
            .filter(|s| !s.is_empty())
        else {
            info!("Bootstrap data secret of Machine {}/{} is not set yet", namespace, owner_name);
            return Ok(None);
        };
        let Some(bootstrap_data) = self.bootstrap_data(&namespace, &secret_name).await? else {
            info!("Bootstrap data secret {}/{} is missing or empty", namespace, secret_name);
            return Ok(None);
        };

        let tinkerbell_cluster = match cluster
            .spec
            .infrastructure_ref
            .as_ref()
            .filter(|r| r.kind.as_deref() == Some("TinkerbellCluster"))
            .and_then(|r| r.name.clone())
        {
            Some(name) => self.client.get_tinkerbell_cluster(&namespace, &name).await?,
            None => None,
        };

        debug!("TinkerbellMachine {} owner chain is ready", key);
        Ok(Some(MachineScope {
            machine: owner,
            cluster_name,
            bootstrap_data,
            tinkerbell_cluster,
        }))
    }

    async fn bootstrap_data(
        &self,
        namespace: &str,
        secret_name: &str,
    ) -> Result<Option<String>, ControllerError> {
        let Some(secret) = self.client.get_secret(namespace, secret_name).await? else {
            return Ok(None);
        };
        let Some(value) = secret.data.as_ref().and_then(|d| d.get(BOOTSTRAP_DATA_KEY)) else {
            return Ok(None);
        };
        if value.0.is_empty() {
            return Ok(None);
        }
        String::from_utf8(value.0.clone()).map(Some).map_err(|_| {
            ControllerError::InvalidConfig(format!(
                "bootstrap data in secret {}/{} is not valid UTF-8",
                namespace, secret_name
            ))
        })
    }
}
