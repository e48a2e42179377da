//! Scheduling worker: consumes triggers and commits admission decisions.
//!
//! One worker handles one trigger at a time:
//!
//! ```text
//! receive trigger(deployment_id)
//!   ├── deployment missing / cluster missing  → log, ack (discard)
//!   ├── deployment not queued (duplicate)     → ack
//!   ├── policy says Defer                     → ack, stays queued
//!   ├── policy says Admit → commit(version)   → ack
//!   │                        └── Conflict     → decide again from fresh state
//!   └── error → requeue behind pending triggers
//!               └── delivery budget spent     → ack, stays queued
//! ```
//!
//! The ack is sent only after the decision is committed, so a crash in
//! between leaves the trigger unacknowledged and it is delivered again.
//! Re-processing is harmless because every decision is recomputed from
//! persisted state.
//!
//! The worker must run as a single instance per store, or with the
//! transport limiting consumers to one in-flight delivery in total. The
//! versioned commit keeps the ledger correct even if that is violated.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use gridq_queue::{
    Connector, Delivery, QueueResult, RetryPolicy, TriggerQueue, connect_with_retry,
};
use gridq_state::*;

use crate::config::SchedulerConfig;
use crate::error::{SchedulerError, SchedulerResult};
use crate::ledger::ResourceLedger;
use crate::policy::{self, DeferReason, Decision};

/// What processing one trigger did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Deployment is now running; `available` is the cluster's capacity
    /// after the debit.
    Admitted { available: Resources },
    /// Deployment left queued.
    Deferred(DeferReason),
    /// Deployment was not queued any more; nothing to decide.
    Skipped(DeploymentStatus),
    /// Deployment or its cluster no longer exists.
    Discarded(DiscardReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscardReason {
    DeploymentMissing,
    ClusterMissing(ClusterId),
}

pub struct SchedulingWorker {
    store: StateStore,
    ledger: ResourceLedger,
    connector: Arc<dyn Connector>,
    retry: RetryPolicy,
    max_conflict_retries: u32,
    requeue_delay: Duration,
    max_deliveries: u32,
}

impl SchedulingWorker {
    pub fn new(store: StateStore, connector: Arc<dyn Connector>, config: &SchedulerConfig) -> Self {
        Self {
            ledger: ResourceLedger::new(store.clone()),
            store,
            connector,
            retry: config.retry_policy(),
            max_conflict_retries: config.worker.max_conflict_retries.max(1),
            requeue_delay: config.requeue_delay(),
            max_deliveries: config.worker.max_deliveries.max(1),
        }
    }

    /// Consume triggers until `shutdown` fires.
    ///
    /// Returns `TransportUnavailable` if the queue cannot be reached within
    /// the retry budget, at startup or after a lost connection.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> SchedulerResult<()> {
        let Some(mut queue) = self.connect(&mut shutdown).await? else {
            return Ok(());
        };
        info!("scheduling worker started");

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                received = queue.receive() => {
                    let handled = match received {
                        Ok(delivery) => self.handle(queue.as_ref(), delivery).await,
                        Err(e) => Err(e),
                    };
                    if let Err(e) = handled {
                        warn!(error = %e, "lost work queue connection, reconnecting");
                        match self.connect(&mut shutdown).await? {
                            Some(reconnected) => queue = reconnected,
                            None => break,
                        }
                    }
                }
                _ = shutdown.changed() => break,
            }
        }

        info!("scheduling worker shutting down");
        Ok(())
    }

    /// Run the admission decision for one deployment and commit it.
    ///
    /// Lost races on the cluster row are retried from freshly read state
    /// up to the configured limit.
    pub fn process(&self, deployment_id: DeploymentId) -> SchedulerResult<ProcessOutcome> {
        retry_conflicts(deployment_id, self.max_conflict_retries, || {
            self.decide_and_commit(deployment_id)
        })
    }

    // ── Internal helpers ────────────────────────────────────────────

    async fn connect(
        &self,
        shutdown: &mut watch::Receiver<bool>,
    ) -> SchedulerResult<Option<Arc<dyn TriggerQueue>>> {
        tokio::select! {
            connected = connect_with_retry(self.connector.as_ref(), self.retry) => {
                connected
                    .map(Some)
                    .map_err(|e| SchedulerError::TransportUnavailable(e.to_string()))
            }
            _ = shutdown.changed() => Ok(None),
        }
    }

    /// Process one delivery and settle it with the queue. Errors returned
    /// here are transport errors.
    async fn handle(&self, queue: &dyn TriggerQueue, delivery: Delivery) -> QueueResult<()> {
        debug!(
            deployment_id = delivery.trigger.deployment_id,
            tag = delivery.tag,
            attempt = delivery.attempt,
            "trigger received"
        );
        let result = self.process(delivery.trigger.deployment_id);
        self.settle(queue, &delivery, result).await
    }

    /// Ack a processed delivery. A failed one is requeued behind pending
    /// triggers until its delivery budget is spent, then acked and left
    /// for the re-scan.
    async fn settle(
        &self,
        queue: &dyn TriggerQueue,
        delivery: &Delivery,
        result: SchedulerResult<ProcessOutcome>,
    ) -> QueueResult<()> {
        let deployment_id = delivery.trigger.deployment_id;
        match result {
            Ok(outcome) => {
                debug!(deployment_id, ?outcome, "trigger processed");
                queue.ack(delivery.tag).await
            }
            Err(e) if delivery.attempt >= self.max_deliveries => {
                error!(
                    deployment_id,
                    attempts = delivery.attempt,
                    error = %e,
                    "dropping trigger after repeated failures; deployment stays queued"
                );
                queue.ack(delivery.tag).await
            }
            Err(e) => {
                warn!(
                    deployment_id,
                    attempt = delivery.attempt,
                    error = %e,
                    "scheduling decision failed, requeueing trigger"
                );
                tokio::time::sleep(self.requeue_delay).await;
                queue.requeue(delivery.tag).await
            }
        }
    }

    fn decide_and_commit(&self, deployment_id: DeploymentId) -> SchedulerResult<ProcessOutcome> {
        let Some(deployment) = self.store.get_deployment(deployment_id)? else {
            warn!(deployment_id, "deployment not found, discarding trigger");
            return Ok(ProcessOutcome::Discarded(DiscardReason::DeploymentMissing));
        };
        if deployment.status != DeploymentStatus::Queued {
            debug!(
                deployment_id,
                status = %deployment.status,
                "deployment not queued, nothing to do"
            );
            return Ok(ProcessOutcome::Skipped(deployment.status));
        }
        let Some(cluster) = self.store.get_cluster(deployment.cluster_id)? else {
            warn!(
                deployment_id,
                cluster_id = deployment.cluster_id,
                "cluster for deployment not found, discarding trigger"
            );
            return Ok(ProcessOutcome::Discarded(DiscardReason::ClusterMissing(
                deployment.cluster_id,
            )));
        };

        let queued = self.store.list_queued(cluster.id)?;
        match policy::evaluate(&deployment, &cluster, &queued) {
            Decision::Admit => {
                let (_, after) = self.ledger.admit(deployment_id, cluster.version)?;
                info!(
                    deployment_id,
                    cluster_id = cluster.id,
                    priority = deployment.priority,
                    "deployment admitted"
                );
                Ok(ProcessOutcome::Admitted {
                    available: after.available,
                })
            }
            Decision::Defer(reason) => {
                info!(
                    deployment_id,
                    cluster_id = cluster.id,
                    priority = deployment.priority,
                    %reason,
                    "deployment deferred"
                );
                Ok(ProcessOutcome::Deferred(reason))
            }
        }
    }
}

/// Run `decide` until it stops losing races on the cluster row, at most
/// `max_attempts` times.
fn retry_conflicts<F>(
    deployment_id: DeploymentId,
    max_attempts: u32,
    mut decide: F,
) -> SchedulerResult<ProcessOutcome>
where
    F: FnMut() -> SchedulerResult<ProcessOutcome>,
{
    for attempt in 1..=max_attempts {
        match decide() {
            Err(SchedulerError::State(StateError::Conflict(reason))) => {
                debug!(deployment_id, attempt, %reason, "admission conflicted, deciding again");
            }
            other => return other,
        }
    }
    Err(SchedulerError::Conflict {
        deployment_id,
        attempts: max_attempts,
    })
}
