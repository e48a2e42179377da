//! Deployment lifecycle after admission.
//!
//! ```text
//! QUEUED ──admit──▶ RUNNING ──complete──▶ COMPLETED
//!    │                 └─────fail──────▶ FAILED
//!    └──────fail──────────────────────▶ FAILED
//! ```
//!
//! Leaving `Running` returns the deployment's reservation to the cluster
//! in the same transaction as the status write. Any change that can
//! unblock waiting work (freed capacity, or a queued deployment leaving
//! the queue) re-triggers every deployment still queued on that cluster,
//! highest priority first.
//!
//! Completion is an external signal: whoever runs the container calls
//! `complete` or `fail`. This module does not decide when a deployment
//! has finished.

use std::sync::Arc;

use tracing::{info, warn};

use gridq_state::*;

use crate::error::{SchedulerError, SchedulerResult};
use crate::ledger::ResourceLedger;
use crate::publisher::TriggerPublisher;

pub struct LifecycleManager {
    store: StateStore,
    ledger: ResourceLedger,
    publisher: Arc<TriggerPublisher>,
}

impl LifecycleManager {
    pub fn new(store: StateStore, publisher: Arc<TriggerPublisher>) -> Self {
        Self {
            ledger: ResourceLedger::new(store.clone()),
            store,
            publisher,
        }
    }

    /// Mark a running deployment completed and release its resources.
    pub async fn complete(&self, deployment_id: DeploymentId) -> SchedulerResult<Deployment> {
        let deployment = self.load(deployment_id)?;
        if deployment.status != DeploymentStatus::Running {
            return Err(invalid(&deployment, DeploymentStatus::Completed));
        }
        self.settle(deployment_id, DeploymentStatus::Completed).await
    }

    /// Mark a deployment failed. A running deployment releases its
    /// resources; a queued one just leaves the queue.
    pub async fn fail(&self, deployment_id: DeploymentId) -> SchedulerResult<Deployment> {
        let deployment = self.load(deployment_id)?;
        match deployment.status {
            DeploymentStatus::Running => self.settle(deployment_id, DeploymentStatus::Failed).await,
            DeploymentStatus::Queued => {
                let failed = match self.store.transition_status(
                    deployment_id,
                    DeploymentStatus::Queued,
                    DeploymentStatus::Failed,
                ) {
                    Ok(failed) => failed,
                    Err(StateError::Conflict(_)) => {
                        let current = self.load(deployment_id)?;
                        return Err(invalid(&current, DeploymentStatus::Failed));
                    }
                    Err(e) => return Err(e.into()),
                };
                info!(deployment_id, cluster_id = failed.cluster_id, "queued deployment failed");
                self.retrigger_cluster(failed.cluster_id).await;
                Ok(failed)
            }
            _ => Err(invalid(&deployment, DeploymentStatus::Failed)),
        }
    }

    /// Publish a trigger for every deployment still queued on a cluster.
    /// Returns how many triggers were published.
    pub async fn retrigger_cluster(&self, cluster_id: ClusterId) -> usize {
        let queued = match self.store.list_queued(cluster_id) {
            Ok(queued) => queued,
            Err(e) => {
                warn!(cluster_id, error = %e, "could not list queued deployments");
                return 0;
            }
        };
        if queued.is_empty() {
            return 0;
        }
        let published = self.publisher.publish_all(queued.iter().map(|d| d.id).collect::<Vec<_>>()).await;
        info!(cluster_id, waiting = queued.len(), published, "re-triggered queued deployments");
        published
    }

    async fn settle(
        &self,
        deployment_id: DeploymentId,
        to: DeploymentStatus,
    ) -> SchedulerResult<Deployment> {
        let (deployment, _) = match self.ledger.settle(deployment_id, to) {
            Ok(settled) => settled,
            Err(SchedulerError::State(StateError::Conflict(_))) => {
                let current = self.load(deployment_id)?;
                return Err(invalid(&current, to));
            }
            Err(e) => return Err(e),
        };
        self.retrigger_cluster(deployment.cluster_id).await;
        Ok(deployment)
    }

    fn load(&self, deployment_id: DeploymentId) -> SchedulerResult<Deployment> {
        self.store
            .get_deployment(deployment_id)?
            .ok_or(SchedulerError::DeploymentNotFound(deployment_id))
    }
}

fn invalid(deployment: &Deployment, to: DeploymentStatus) -> SchedulerError {
    SchedulerError::InvalidTransition {
        deployment_id: deployment.id,
        from: deployment.status,
        to,
    }
}
