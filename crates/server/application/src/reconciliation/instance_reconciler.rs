//! Instance Reconciler
//!
//! Background loop that lists job workloads in the cluster, writes their
//! observed status into the instance store and cleans up every workload seen
//! in a terminal state: capture the log, delete the workload, delete the
//! configuration. A workload deleted once is no longer listed, so cleanup
//! happens once per workload.

use futures::FutureExt;
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::job_instances::LogStore;
use orch_server_domain::{
    ClusterDeployer, ClusterError, InstanceFilter, InstanceId, JobInstanceRepository,
    ObservedInstance, Result, StatusTransition,
};

/// Configuration for the Instance Reconciler
#[derive(Debug, Clone)]
pub struct InstanceReconcilerConfig {
    /// Interval between ticks (default: 5 seconds)
    pub tick_interval: Duration,
}

impl Default for InstanceReconcilerConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(5),
        }
    }
}

/// Result of a reconciliation tick
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconciliationReport {
    /// Workloads listed by the cluster
    pub observed: usize,
    /// Records whose status moved forward
    pub advanced: usize,
    /// Instances whose resources were fully removed
    pub cleaned_up: Vec<InstanceId>,
    /// Instances with a deletion that failed and will be retried
    pub cleanup_failures: Vec<InstanceId>,
    /// Store writes that failed
    pub store_errors: usize,
}

pub struct InstanceReconciler {
    deployer: Arc<dyn ClusterDeployer>,
    instances: Arc<dyn JobInstanceRepository>,
    log_store: LogStore,
    config: InstanceReconcilerConfig,
    /// Instances whose deletion failed; only the deletes are retried
    retry_deletes: Mutex<HashSet<InstanceId>>,
}

impl InstanceReconciler {
    pub fn new(
        deployer: Arc<dyn ClusterDeployer>,
        instances: Arc<dyn JobInstanceRepository>,
        log_store: LogStore,
        config: InstanceReconcilerConfig,
    ) -> Self {
        Self {
            deployer,
            instances,
            log_store,
            config,
            retry_deletes: Mutex::new(HashSet::new()),
        }
    }

    /// Runs a single reconciliation tick
    pub async fn reconcile_once(&self) -> Result<ReconciliationReport> {
        let observed = self.deployer.list_instances(&InstanceFilter::all()).await?;
        let mut report = ReconciliationReport {
            observed: observed.len(),
            ..Default::default()
        };

        for instance in &observed {
            let transition = match self
                .instances
                .advance_status(&instance.instance_id, instance.status)
                .await
            {
                Ok(transition) => transition,
                Err(e) => {
                    error!(target: "orch::reconciler", instance_id = %instance.instance_id, "Failed to store observed status: {}", e);
                    report.store_errors += 1;
                    continue;
                }
            };

            match transition {
                StatusTransition::Advanced { from } => {
                    report.advanced += 1;
                    debug!(
                        target: "orch::reconciler",
                        instance_id = %instance.instance_id,
                        "Status {} -> {}", from, instance.status
                    );
                }
                // Finished workload without a record, e.g. a dispatch whose
                // store write was lost
                StatusTransition::Missing => {
                    warn!(target: "orch::reconciler", instance_id = %instance.instance_id, "Workload has no instance record");
                }
                StatusTransition::Unchanged | StatusTransition::Rejected { .. } => {}
            }

            // A listed terminal workload still needs cleanup whatever the
            // stored status says
            if instance.status.is_terminal() {
                let retrying = self.retry_deletes.lock().await.contains(&instance.instance_id);
                if !retrying {
                    self.capture_log(instance).await;
                }
                self.delete_resources(&instance.instance_id, &mut report).await;
            }
        }

        let handled: HashSet<&InstanceId> = report
            .cleaned_up
            .iter()
            .chain(report.cleanup_failures.iter())
            .collect();
        let pending: Vec<InstanceId> = self
            .retry_deletes
            .lock()
            .await
            .iter()
            .filter(|id| !handled.contains(id))
            .cloned()
            .collect();
        drop(handled);
        for id in pending {
            self.delete_resources(&id, &mut report).await;
        }

        if !report.cleaned_up.is_empty() || !report.cleanup_failures.is_empty() {
            info!(
                target: "orch::reconciler",
                "Reconciliation tick: {} observed, {} advanced, {} cleaned up, {} cleanup failures",
                report.observed,
                report.advanced,
                report.cleaned_up.len(),
                report.cleanup_failures.len()
            );
        }
        Ok(report)
    }

    /// Best effort; a capture failure never blocks deletion
    async fn capture_log(&self, instance: &ObservedInstance) {
        let path = match self
            .log_store
            .prepare(&instance.request_id, &instance.instance_id)
            .await
        {
            Ok(path) => path,
            Err(e) => {
                warn!(target: "orch::reconciler", instance_id = %instance.instance_id, "Cannot prepare log file: {}", e);
                return;
            }
        };

        match self
            .deployer
            .stream_log_to_file(&instance.instance_id, &path)
            .await
        {
            Ok(bytes) => debug!(
                target: "orch::reconciler",
                instance_id = %instance.instance_id,
                "Captured {} bytes of log into {}", bytes, path.display()
            ),
            Err(e) => warn!(target: "orch::reconciler", instance_id = %instance.instance_id, "Log capture failed: {}", e),
        }
    }

    async fn delete_resources(&self, id: &InstanceId, report: &mut ReconciliationReport) {
        let workload = self.deployer.delete_workload(id).await;
        let config = self.deployer.delete_config(id).await;

        let workload_ok = deletion_done(id, "workload", workload);
        let config_ok = deletion_done(id, "config", config);

        let mut retry = self.retry_deletes.lock().await;
        if workload_ok && config_ok {
            retry.remove(id);
            report.cleaned_up.push(id.clone());
        } else {
            retry.insert(id.clone());
            report.cleanup_failures.push(id.clone());
        }
    }

    /// Runs the reconciliation loop until cancelled.
    /// Tick failures and panics are logged and the loop carries on.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        info!(
            target: "orch::reconciler",
            "InstanceReconciler started with interval={:?}",
            self.config.tick_interval
        );

        let mut ticker = interval(self.config.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!(target: "orch::reconciler", "InstanceReconciler shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    match AssertUnwindSafe(self.reconcile_once()).catch_unwind().await {
                        Ok(Ok(_)) => {}
                        Ok(Err(e)) => error!(target: "orch::reconciler", "Reconciliation tick failed: {}", e),
                        Err(_) => error!(target: "orch::reconciler", "Reconciliation tick panicked"),
                    }
                }
            }
        }
    }

    pub fn spawn(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(Arc::clone(self).run(cancel))
    }
}

/// `NotFound` counts as done
fn deletion_done(id: &InstanceId, what: &str, result: std::result::Result<(), ClusterError>) -> bool {
    match result {
        Ok(()) => true,
        Err(e) if e.is_not_found() => {
            debug!(target: "orch::reconciler", instance_id = %id, "{} already gone", what);
            true
        }
        Err(e) => {
            error!(target: "orch::reconciler", instance_id = %id, "Failed to delete {}: {}", what, e);
            false
        }
    }
}
