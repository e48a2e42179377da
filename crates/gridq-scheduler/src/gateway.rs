//! Submission gateway: persists new deployments and triggers scheduling.
//!
//! Submission succeeds or fails on persistence alone. The scheduling
//! decision happens later, in the worker, and is not reported back here.
//! If the trigger cannot be published after the deployment was stored,
//! the submission still succeeds with a warning: the deployment stays
//! queued until something re-triggers it (`retrigger`, a release on the
//! same cluster, or the re-scan task).

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use gridq_state::*;

use crate::error::{SchedulerError, SchedulerResult};
use crate::publisher::TriggerPublisher;

/// Result of a successful submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubmitOutcome {
    pub deployment: Deployment,
    /// False when the deployment was stored but its trigger was not sent.
    pub trigger_published: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

pub struct SubmissionGateway {
    store: StateStore,
    publisher: Arc<TriggerPublisher>,
}

impl SubmissionGateway {
    pub fn new(store: StateStore, publisher: Arc<TriggerPublisher>) -> Self {
        Self { store, publisher }
    }

    /// Store `request` as a queued deployment and publish its trigger.
    ///
    /// Fails with `ClusterNotFound`, writing nothing, when the target
    /// cluster does not exist.
    pub async fn submit(&self, request: NewDeployment) -> SchedulerResult<SubmitOutcome> {
        let deployment = match self.store.insert_deployment(&request) {
            Ok(deployment) => deployment,
            Err(StateError::NotFound(_)) => {
                return Err(SchedulerError::ClusterNotFound(request.cluster_id));
            }
            Err(e) => return Err(e.into()),
        };
        info!(
            deployment_id = deployment.id,
            cluster_id = deployment.cluster_id,
            priority = deployment.priority,
            request = %deployment.request,
            "deployment queued"
        );

        match self.publisher.publish(deployment.id).await {
            Ok(()) => Ok(SubmitOutcome {
                deployment,
                trigger_published: true,
                warning: None,
            }),
            Err(e) => {
                warn!(
                    deployment_id = deployment.id,
                    error = %e,
                    "deployment stored but scheduling trigger was not published"
                );
                Ok(SubmitOutcome {
                    warning: Some(format!(
                        "deployment {} is queued but was not sent to the scheduler ({e}); \
                         it will be scheduled after a re-trigger",
                        deployment.id
                    )),
                    deployment,
                    trigger_published: false,
                })
            }
        }
    }

    /// Publish a fresh trigger for a queued deployment.
    pub async fn retrigger(&self, deployment_id: DeploymentId) -> SchedulerResult<()> {
        let deployment = self
            .store
            .get_deployment(deployment_id)?
            .ok_or(SchedulerError::DeploymentNotFound(deployment_id))?;
        if deployment.status != DeploymentStatus::Queued {
            return Err(SchedulerError::NotQueued {
                deployment_id,
                status: deployment.status,
            });
        }
        self.publisher.publish(deployment_id).await?;
        info!(deployment_id, "deployment re-triggered");
        Ok(())
    }
}
