//! Resource watcher for the Tinkerbell machine controller.
//!
//! TinkerbellMachines are watched through `kube_runtime::Controller`. The
//! Workflows, BMC Jobs and IPAddressClaims created for a machine carry a
//! controller owner reference, so their status changes wake up the owning
//! machine instead of a timed poll.

use crate::error::ControllerError;
use crate::metrics::Metrics;
use crate::reconcile_helpers::object_key;
use crate::reconciler::Reconciler;
use crds::{IPAddressClaim, Job, TinkerbellMachine, Workflow};
use futures::StreamExt;
use kube::Api;
use kube_runtime::{
    controller::{Action, Config as RuntimeConfig},
    watcher, Controller,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Shared state handed to every reconcile call
pub struct Context {
    pub reconciler: Arc<Reconciler>,
    pub metrics: Arc<Metrics>,
}

async fn reconcile(machine: Arc<TinkerbellMachine>, ctx: Arc<Context>) -> Result<Action, ControllerError> {
    let started = Instant::now();
    debug!("Reconciling TinkerbellMachine {}", object_key(machine.as_ref()));

    let result = ctx.reconciler.reconcile_tinkerbell_machine(&machine).await;
    ctx.metrics
        .observe(started.elapsed(), result.as_ref().map(|_| ()));
    result
}

fn error_policy(machine: Arc<TinkerbellMachine>, error: &ControllerError, ctx: Arc<Context>) -> Action {
    let key = object_key(machine.as_ref());
    let delay = ctx.reconciler.error_requeue(&key, error);
    if error.is_conflict() {
        debug!("Conflict on TinkerbellMachine {}, retrying in {:?}", key, delay);
    } else {
        warn!("Reconciliation of TinkerbellMachine {} failed: {}, retrying in {:?}", key, error, delay);
    }
    Action::requeue(delay)
}

/// Watches TinkerbellMachines and the objects they own.
pub struct Watcher {
    context: Arc<Context>,
    machine_api: Api<TinkerbellMachine>,
    workflow_api: Api<Workflow>,
    job_api: Api<Job>,
    claim_api: Api<IPAddressClaim>,
    debounce: Duration,
    concurrency: u16,
}

impl Watcher {
    /// Creates a new watcher; all APIs must share the same namespace scope.
    pub fn new(
        context: Arc<Context>,
        machine_api: Api<TinkerbellMachine>,
        workflow_api: Api<Workflow>,
        job_api: Api<Job>,
        claim_api: Api<IPAddressClaim>,
    ) -> Self {
        let config = &context.reconciler.config;
        let debounce = config.debounce;
        let concurrency = config.concurrency;
        Self {
            context,
            machine_api,
            workflow_api,
            job_api,
            claim_api,
            debounce,
            concurrency,
        }
    }

    /// Runs the reconcile loop until the watch stream ends.
    pub async fn watch_tinkerbell_machines(&self) -> Result<(), ControllerError> {
        info!(
            "Starting TinkerbellMachine watcher (debounce {:?}, concurrency {})",
            self.debounce, self.concurrency
        );

        let runtime_config = RuntimeConfig::default()
            .debounce(self.debounce)
            .concurrency(self.concurrency);

        Controller::new(self.machine_api.clone(), watcher::Config::default())
            .owns(self.workflow_api.clone(), watcher::Config::default())
            .owns(self.job_api.clone(), watcher::Config::default())
            .owns(self.claim_api.clone(), watcher::Config::default())
            .with_config(runtime_config)
            .shutdown_on_signal()
            .run(reconcile, error_policy, Arc::clone(&self.context))
            .for_each(|res| async move {
                match res {
                    Ok((obj, _)) => debug!("Reconciled TinkerbellMachine {}/{}", obj.namespace.as_deref().unwrap_or_default(), obj.name),
                    Err(e) => error!("TinkerbellMachine controller error: {}", e),
                }
            })
            .await;

        info!("TinkerbellMachine watcher stopped");
        Ok(())
    }
}
