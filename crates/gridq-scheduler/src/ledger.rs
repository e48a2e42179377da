//! Resource ledger: the only writer of a cluster's available capacity.
//!
//! Every method runs as a single store transaction; see
//! [`gridq_state::StateStore`] for the isolation guarantees.
//!
//! The scheduler only uses [`ResourceLedger::admit`] and
//! [`ResourceLedger::settle`], which pair the capacity change with the
//! deployment's status write. `try_reserve` and `release` are the bare
//! capacity primitives, for callers that account for capacity without a
//! deployment record.

use tracing::{debug, info};

use gridq_state::*;

use crate::error::{SchedulerError, SchedulerResult};

#[derive(Clone)]
pub struct ResourceLedger {
    store: StateStore,
}

impl ResourceLedger {
    pub fn new(store: StateStore) -> Self {
        Self { store }
    }

    /// Current capacity record of a cluster.
    pub fn snapshot(&self, cluster_id: ClusterId) -> SchedulerResult<Cluster> {
        self.store
            .get_cluster(cluster_id)?
            .ok_or(SchedulerError::ClusterNotFound(cluster_id))
    }

    /// Reserve `amount` if every dimension fits; otherwise change nothing
    /// and return `false`. Does not touch any deployment; admission goes
    /// through [`ResourceLedger::admit`].
    pub fn try_reserve(&self, cluster_id: ClusterId, amount: &Resources) -> SchedulerResult<bool> {
        match self.store.try_reserve(cluster_id, amount) {
            Ok(reserved) => {
                debug!(cluster_id, %amount, reserved, "reservation attempted");
                Ok(reserved)
            }
            Err(StateError::NotFound(_)) => Err(SchedulerError::ClusterNotFound(cluster_id)),
            Err(e) => Err(e.into()),
        }
    }

    /// Give `amount` back to a cluster. Does not touch any deployment;
    /// releases on completion go through [`ResourceLedger::settle`].
    pub fn release(&self, cluster_id: ClusterId, amount: &Resources) -> SchedulerResult<Cluster> {
        match self.store.release(cluster_id, amount) {
            Ok(cluster) => Ok(cluster),
            Err(StateError::NotFound(_)) => Err(SchedulerError::ClusterNotFound(cluster_id)),
            Err(e) => Err(e.into()),
        }
    }

    /// Debit a deployment's request and mark it running, provided the
    /// cluster is still at `expected_version`.
    ///
    /// A lost race comes back as `SchedulerError::State(StateError::Conflict)`
    /// so the caller can decide again from fresh state.
    pub fn admit(
        &self,
        deployment_id: DeploymentId,
        expected_version: u64,
    ) -> SchedulerResult<(Deployment, Cluster)> {
        let (deployment, cluster) = self.store.commit_admission(deployment_id, expected_version)?;
        info!(
            deployment_id,
            cluster_id = cluster.id,
            available = %cluster.available,
            "capacity debited for admission"
        );
        Ok((deployment, cluster))
    }

    /// Move a running deployment to a terminal status and credit its
    /// request back to the cluster.
    pub fn settle(
        &self,
        deployment_id: DeploymentId,
        to: DeploymentStatus,
    ) -> SchedulerResult<(Deployment, Cluster)> {
        let (deployment, cluster) = self.store.commit_release(deployment_id, to)?;
        info!(
            deployment_id,
            cluster_id = cluster.id,
            status = %to,
            available = %cluster.available,
            "capacity credited on release"
        );
        Ok((deployment, cluster))
    }
}
