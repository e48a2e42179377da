//! Scheduler error types.

use gridq_state::{ClusterId, DeploymentId, DeploymentStatus};
use thiserror::Error;

/// Errors that can occur during scheduling operations.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("cluster not found: {0}")]
    ClusterNotFound(ClusterId),

    #[error("deployment not found: {0}")]
    DeploymentNotFound(DeploymentId),

    #[error("deployment {deployment_id} cannot go from {from} to {to}")]
    InvalidTransition {
        deployment_id: DeploymentId,
        from: DeploymentStatus,
        to: DeploymentStatus,
    },

    #[error("deployment {deployment_id} is {status}, only queued deployments can be triggered")]
    NotQueued {
        deployment_id: DeploymentId,
        status: DeploymentStatus,
    },

    /// Every attempt to commit an admission lost a race on the cluster row.
    #[error("deployment {deployment_id}: admission conflicted {attempts} times")]
    Conflict {
        deployment_id: DeploymentId,
        attempts: u32,
    },

    #[error("transport unavailable: {0}")]
    TransportUnavailable(String),

    #[error("state store error: {0}")]
    State(#[from] gridq_state::StateError),

    #[error("queue error: {0}")]
    Queue(#[from] gridq_queue::QueueError),
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;
