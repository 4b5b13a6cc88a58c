//! Main controller implementation.
//!
//! Wires the object-store client, the reconciler, the TinkerbellMachine
//! watcher and the probe server together. The controller runs until either
//! the watcher or the probe server stops.

use crate::config::ControllerConfig;
use crate::error::ControllerError;
use crate::metrics::{self, Metrics};
use crate::reconciler::Reconciler;
use crate::watcher::{Context, Watcher};
use crds::{IPAddressClaim, Job, TinkerbellMachine, Workflow};
use infra_client::{InfraClient, InfraError};
use kube::{Api, Client};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

/// Namespaced API, or cluster-wide when no namespace is configured
fn scoped_api<K>(client: &Client, namespace: Option<&str>) -> Api<K>
where
    K: kube::Resource<Scope = k8s_openapi::NamespaceResourceScope>,
    K::DynamicType: Default,
{
    match namespace {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    }
}

/// Main controller for TinkerbellMachine provisioning.
pub struct Controller {
    machine_watcher: JoinHandle<Result<(), ControllerError>>,
    probe_server: JoinHandle<Result<(), ControllerError>>,
}

impl Controller {
    /// Creates a new controller instance and spawns its tasks.
    pub async fn new(config: ControllerConfig) -> Result<Self, ControllerError> {
        info!("Initializing Tinkerbell machine controller");

        let kube_client = Client::try_default()
            .await
            .map_err(|e| ControllerError::Infra(InfraError::Kube(e)))?;

        let namespace = config.watch_namespace.clone();
        let machine_api: Api<TinkerbellMachine> = scoped_api(&kube_client, namespace.as_deref());
        let workflow_api: Api<Workflow> = scoped_api(&kube_client, namespace.as_deref());
        let job_api: Api<Job> = scoped_api(&kube_client, namespace.as_deref());
        let claim_api: Api<IPAddressClaim> = scoped_api(&kube_client, namespace.as_deref());

        let metrics = Arc::new(
            Metrics::new().map_err(|e| ControllerError::InvalidConfig(format!("metrics registry: {}", e)))?,
        );
        let probe_addr = config.probe_addr;
        let reconciler = Arc::new(Reconciler::new(InfraClient::new(kube_client), config));

        let context = Arc::new(Context {
            reconciler,
            metrics: Arc::clone(&metrics),
        });
        let watcher = Watcher::new(context, machine_api, workflow_api, job_api, claim_api);

        let machine_watcher = tokio::spawn(async move { watcher.watch_tinkerbell_machines().await });
        let probe_server = tokio::spawn(async move { metrics::serve(probe_addr, metrics).await });

        Ok(Self {
            machine_watcher,
            probe_server,
        })
    }

    pub async fn run(mut self) -> Result<(), ControllerError> {
        info!("Tinkerbell machine controller running");

        tokio::select! {
            result = &mut self.machine_watcher => {
                result.map_err(|e| ControllerError::Watch(format!("TinkerbellMachine watcher panicked: {}", e)))??;
            }
            result = &mut self.probe_server => {
                result.map_err(|e| ControllerError::Watch(format!("Probe server panicked: {}", e)))??;
            }
        }

        Ok(())
    }
}
