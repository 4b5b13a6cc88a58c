//! Reconciliation logic for TinkerbellMachines.
//!
//! One pass reads the observed state, runs the steps below in a fixed order
//! and stops at the first step that has to wait for an external collaborator:
//! - `scope`: owner Machine, Cluster and bootstrap data gates
//! - `hardware` + `affinity`: exclusive hardware binding
//! - `ipam`: optional managed address for the primary interface
//! - `provisioning` + `template` + `bmc`: power cycling, Template and Workflow
//! - `teardown`: ordered release of everything above on deletion
//!
//! Nothing is awaited inside a pass. Waiting is expressed by returning an
//! `Action` and relying on a watch event on an owned object or a timed requeue.

pub mod affinity;
pub mod bmc;
pub mod hardware;
pub mod ipam;
pub mod provisioning;
pub mod scope;
pub mod teardown;
pub mod template;

#[cfg(test)]
mod bmc_test;
#[cfg(test)]
mod hardware_test;
#[cfg(test)]
mod ipam_test;

use crate::backoff::FibonacciBackoff;
use crate::config::ControllerConfig;
use crate::error::ControllerError;
use crate::reconcile_helpers::{
    failure_status_needs_update, failure_status_patch, finalizers_patch, finalizers_with,
    has_finalizer, object_key,
};
use crds::{TinkerbellMachine, MACHINE_FINALIZER};
use infra_client::InfraClientTrait;
use kube::ResourceExt;
use kube_runtime::controller::Action;
use provisioning::ProvisioningState;
use ipam::AddressState;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Backoff state for a resource
#[derive(Debug, Clone)]
struct BackoffState {
    backoff: FibonacciBackoff,
    error_count: u32,
}

impl BackoffState {
    fn new(min_minutes: u64, max_minutes: u64) -> Self {
        Self {
            backoff: FibonacciBackoff::new(min_minutes, max_minutes),
            error_count: 0,
        }
    }

    fn increment_error(&mut self) {
        self.error_count += 1;
    }

    fn reset(&mut self) {
        self.error_count = 0;
        self.backoff.reset();
    }
}

/// Reconciles TinkerbellMachine resources.
pub struct Reconciler {
    pub(crate) client: Box<dyn InfraClientTrait>,
    pub(crate) config: ControllerConfig,
    /// Error count tracking per resource (namespace/name -> BackoffState)
    backoff_states: Arc<Mutex<HashMap<String, BackoffState>>>,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    /// Creates a new reconciler instance.
    pub fn new(client: impl InfraClientTrait + 'static, config: ControllerConfig) -> Self {
        Self {
            client: Box::new(client),
            config,
            backoff_states: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Runs one reconciliation pass for a TinkerbellMachine.
    ///
    /// Terminal failures are recorded on the machine status before being
    /// returned, so an operator can see them without reading controller logs.
    pub async fn reconcile_tinkerbell_machine(
        &self,
        machine: &TinkerbellMachine,
    ) -> Result<Action, ControllerError> {
        let key = object_key(machine);

        let result = if machine.metadata.deletion_timestamp.is_some() {
            self.reconcile_delete(machine).await
        } else {
            self.reconcile_normal(machine).await
        };

        match &result {
            Ok(_) => self.reset_error(&key),
            Err(e) if !e.is_transient() => {
                error!("TinkerbellMachine {} failed: {}", key, e);
                self.record_failure(machine, e).await;
            }
            Err(e) => debug!("TinkerbellMachine {} hit a transient error: {}", key, e),
        }
        result
    }

    async fn reconcile_normal(&self, machine: &TinkerbellMachine) -> Result<Action, ControllerError> {
        let key = object_key(machine);
        let namespace = machine.namespace().unwrap_or_default();
        let name = machine.name_any();

        // The guard token goes on before any other side effect
        let mut machine = machine.clone();
        if !has_finalizer(&machine, MACHINE_FINALIZER) {
            let patch = finalizers_patch(&machine, finalizers_with(&machine, MACHINE_FINALIZER));
            machine = self
                .client
                .patch_tinkerbell_machine(&namespace, &name, &patch)
                .await?;
            info!("Added finalizer to TinkerbellMachine {}", key);
        }

        let Some(scope) = self.machine_scope(&machine).await? else {
            return Ok(Action::requeue(self.config.bootstrap_requeue));
        };

        let hardware = self.ensure_hardware(&machine, &scope).await?;
        let machine = self.ensure_provider_id(&machine, &hardware).await?;

        hardware::validate_hardware(&hardware, machine.spec.ipam_pool_ref.is_some())?;
        provisioning::workflow_boot_options(&machine, &hardware)?;

        let hardware = match self.reconcile_ip_address(&machine, &scope, hardware).await? {
            AddressState::Ready(hardware) => *hardware,
            AddressState::Pending => {
                debug!("TinkerbellMachine {} is waiting for an IP address", key);
                return Ok(Action::await_change());
            }
        };

        match self.reconcile_provisioning(&machine, &scope, &hardware).await? {
            ProvisioningState::Provisioned(hardware) => {
                self.mark_ready(&machine, &hardware).await?;
                Ok(Action::await_change())
            }
            state => {
                debug!("TinkerbellMachine {} provisioning: {:?}", key, state);
                Ok(Action::await_change())
            }
        }
    }

    /// Writes a terminal failure onto the machine status.
    ///
    /// The status write is best effort: the error itself is still returned to
    /// the caller and retried with backoff.
    async fn record_failure(&self, machine: &TinkerbellMachine, failure: &ControllerError) {
        let key = object_key(machine);
        let namespace = machine.namespace().unwrap_or_default();
        let name = machine.name_any();

        // Earlier steps of this pass may have bumped the resourceVersion
        let current = match self.client.get_tinkerbell_machine(&namespace, &name).await {
            Ok(Some(current)) => current,
            Ok(None) => return,
            Err(e) => {
                warn!("Failed to read TinkerbellMachine {} to record failure: {}", key, e);
                return;
            }
        };

        let reason = failure.reason();
        let message = failure.to_string();
        if !failure_status_needs_update(current.status.as_ref(), reason, &message) {
            debug!("TinkerbellMachine {} already reports {}", key, reason);
            return;
        }

        let patch = failure_status_patch(&current, reason, &message);
        if let Err(e) = self
            .client
            .patch_tinkerbell_machine_status(&namespace, &name, &patch)
            .await
        {
            warn!("Failed to record failure on TinkerbellMachine {}: {}", key, e);
        }
    }

    /// Requeue delay after a failed pass
    ///
    /// Conflicts are retried after a short fixed delay with a fresh read;
    /// everything else follows the per-object Fibonacci backoff.
    pub fn error_requeue(&self, resource_key: &str, error: &ControllerError) -> Duration {
        if error.is_conflict() {
            return self.config.conflict_requeue;
        }
        self.increment_error(resource_key);
        let (backoff_seconds, error_count) = self.get_backoff_for_resource(resource_key);
        debug!(
            "TinkerbellMachine {} error #{}, retrying in {}s",
            resource_key, error_count, backoff_seconds
        );
        Duration::from_secs(backoff_seconds)
    }

    /// Get the Fibonacci backoff duration for a resource based on its error count
    ///
    /// Returns (backoff_seconds, error_count)
    pub fn get_backoff_for_resource(&self, resource_key: &str) -> (u64, u32) {
        match self.backoff_states.lock() {
            Ok(mut states) => {
                let state = states.entry(resource_key.to_string()).or_insert_with(|| {
                    BackoffState::new(self.config.backoff_min_minutes, self.config.backoff_max_minutes)
                });
                let backoff_seconds = state.backoff.next_backoff_seconds();
                (backoff_seconds, state.error_count)
            }
            Err(e) => {
                warn!("Failed to lock backoff_states: {}, using default backoff", e);
                (self.config.backoff_min_minutes * 60, 0)
            }
        }
    }

    /// Increment error count for a resource
    pub fn increment_error(&self, resource_key: &str) {
        if let Ok(mut states) = self.backoff_states.lock() {
            let state = states.entry(resource_key.to_string()).or_insert_with(|| {
                BackoffState::new(self.config.backoff_min_minutes, self.config.backoff_max_minutes)
            });
            state.increment_error();
        }
    }

    /// Drops all backoff tracking for a resource that no longer exists
    pub fn forget(&self, resource_key: &str) {
        if let Ok(mut states) = self.backoff_states.lock() {
            states.remove(resource_key);
        }
    }

    /// Reset error count for a resource (on successful reconciliation)
    pub fn reset_error(&self, resource_key: &str) {
        if let Ok(mut states) = self.backoff_states.lock() {
            if let Some(state) = states.get_mut(resource_key) {
                state.reset();
            }
        }
    }
}
