//! Kubernetes-backed implementation of `InfraClientTrait`

use crate::error::InfraError;
use crate::infra_trait::InfraClientTrait;
use crds::{
    Cluster, Hardware, IPAddress, IPAddressClaim, Job, Machine, Template, TinkerbellCluster,
    TinkerbellMachine, Workflow,
};
use k8s_openapi::api::core::v1::Secret;
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::core::NamespaceResourceScope;
use kube::{Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::fmt::Debug;
use tracing::debug;

/// Field manager recorded on every write
const FIELD_MANAGER: &str = "tinkerbell-machine-controller";

/// Object-store client backed by the Kubernetes API server
#[derive(Clone)]
pub struct InfraClient {
    client: Client,
}

impl std::fmt::Debug for InfraClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InfraClient").finish_non_exhaustive()
    }
}

impl InfraClient {
    /// Create a new client from a kube client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api<K>(&self, namespace: &str) -> Api<K>
    where
        K: Resource<Scope = NamespaceResourceScope>,
        <K as Resource>::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), namespace)
    }

    async fn get<K>(&self, namespace: &str, name: &str) -> Result<Option<K>, InfraError>
    where
        K: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Debug,
        <K as Resource>::DynamicType: Default,
    {
        Ok(self.api::<K>(namespace).get_opt(name).await?)
    }

    async fn create<K>(&self, object: &K) -> Result<K, InfraError>
    where
        K: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Serialize + Debug,
        <K as Resource>::DynamicType: Default,
    {
        let namespace = object
            .namespace()
            .ok_or_else(|| InfraError::InvalidRequest(format!("{} has no namespace", object.name_any())))?;
        let what = format!("{}/{}", namespace, object.name_any());
        debug!("Creating {}", what);
        let pp = PostParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        };
        self.api::<K>(&namespace)
            .create(&pp, object)
            .await
            .map_err(|e| InfraError::from_create(e, &what))
    }

    async fn patch<K>(&self, namespace: &str, name: &str, patch: &Value) -> Result<K, InfraError>
    where
        K: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Debug,
        <K as Resource>::DynamicType: Default,
    {
        let what = format!("{}/{}", namespace, name);
        debug!("Patching {}", what);
        let pp = PatchParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        };
        self.api::<K>(namespace)
            .patch(name, &pp, &Patch::Merge(patch))
            .await
            .map_err(|e| InfraError::from_write(e, &what))
    }

    async fn patch_status<K>(&self, namespace: &str, name: &str, patch: &Value) -> Result<K, InfraError>
    where
        K: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Debug,
        <K as Resource>::DynamicType: Default,
    {
        let what = format!("{}/{} status", namespace, name);
        debug!("Patching {}", what);
        let pp = PatchParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        };
        self.api::<K>(namespace)
            .patch_status(name, &pp, &Patch::Merge(patch))
            .await
            .map_err(|e| InfraError::from_write(e, &what))
    }

    async fn delete<K>(&self, namespace: &str, name: &str) -> Result<bool, InfraError>
    where
        K: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Debug,
        <K as Resource>::DynamicType: Default,
    {
        match self.api::<K>(namespace).delete(name, &DeleteParams::background()).await {
            Ok(_) => {
                debug!("Deleted {}/{}", namespace, name);
                Ok(true)
            }
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(false),
            Err(e) => Err(InfraError::Kube(e)),
        }
    }
}

#[async_trait::async_trait]
impl InfraClientTrait for InfraClient {
    async fn get_tinkerbell_machine(&self, namespace: &str, name: &str) -> Result<Option<TinkerbellMachine>, InfraError> {
        self.get(namespace, name).await
    }

    async fn patch_tinkerbell_machine(&self, namespace: &str, name: &str, patch: &Value) -> Result<TinkerbellMachine, InfraError> {
        self.patch(namespace, name, patch).await
    }

    async fn patch_tinkerbell_machine_status(&self, namespace: &str, name: &str, patch: &Value) -> Result<TinkerbellMachine, InfraError> {
        self.patch_status(namespace, name, patch).await
    }

    async fn get_machine(&self, namespace: &str, name: &str) -> Result<Option<Machine>, InfraError> {
        self.get(namespace, name).await
    }

    async fn get_cluster(&self, namespace: &str, name: &str) -> Result<Option<Cluster>, InfraError> {
        self.get(namespace, name).await
    }

    async fn get_tinkerbell_cluster(&self, namespace: &str, name: &str) -> Result<Option<TinkerbellCluster>, InfraError> {
        self.get(namespace, name).await
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, InfraError> {
        self.get(namespace, name).await
    }

    async fn get_hardware(&self, namespace: &str, name: &str) -> Result<Option<Hardware>, InfraError> {
        self.get(namespace, name).await
    }

    async fn list_hardware(&self, namespace: &str, label_selector: Option<&str>) -> Result<Vec<Hardware>, InfraError> {
        let mut lp = ListParams::default();
        if let Some(selector) = label_selector {
            lp = lp.labels(selector);
        }
        let list = self.api::<Hardware>(namespace).list(&lp).await?;
        Ok(list.items)
    }

    async fn patch_hardware(&self, namespace: &str, name: &str, patch: &Value) -> Result<Hardware, InfraError> {
        self.patch(namespace, name, patch).await
    }

    async fn get_template(&self, namespace: &str, name: &str) -> Result<Option<Template>, InfraError> {
        self.get(namespace, name).await
    }

    async fn create_template(&self, template: &Template) -> Result<Template, InfraError> {
        self.create(template).await
    }

    async fn delete_template(&self, namespace: &str, name: &str) -> Result<bool, InfraError> {
        self.delete::<Template>(namespace, name).await
    }

    async fn get_workflow(&self, namespace: &str, name: &str) -> Result<Option<Workflow>, InfraError> {
        self.get(namespace, name).await
    }

    async fn create_workflow(&self, workflow: &Workflow) -> Result<Workflow, InfraError> {
        self.create(workflow).await
    }

    async fn delete_workflow(&self, namespace: &str, name: &str) -> Result<bool, InfraError> {
        self.delete::<Workflow>(namespace, name).await
    }

    async fn get_job(&self, namespace: &str, name: &str) -> Result<Option<Job>, InfraError> {
        self.get(namespace, name).await
    }

    async fn create_job(&self, job: &Job) -> Result<Job, InfraError> {
        self.create(job).await
    }

    async fn get_ip_address_claim(&self, namespace: &str, name: &str) -> Result<Option<IPAddressClaim>, InfraError> {
        self.get(namespace, name).await
    }

    async fn create_ip_address_claim(&self, claim: &IPAddressClaim) -> Result<IPAddressClaim, InfraError> {
        self.create(claim).await
    }

    async fn patch_ip_address_claim(&self, namespace: &str, name: &str, patch: &Value) -> Result<IPAddressClaim, InfraError> {
        self.patch(namespace, name, patch).await
    }

    async fn delete_ip_address_claim(&self, namespace: &str, name: &str) -> Result<bool, InfraError> {
        self.delete::<IPAddressClaim>(namespace, name).await
    }

    async fn get_ip_address(&self, namespace: &str, name: &str) -> Result<Option<IPAddress>, InfraError> {
        self.get(namespace, name).await
    }
}
