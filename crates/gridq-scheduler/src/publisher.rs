//! Trigger publisher shared by every producer of scheduling triggers.
//!
//! Keeps one cached connection. A failed connect or publish drops the
//! cached handle so the next call reconnects; the submission path never
//! waits out the worker's retry budget.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, warn};

use gridq_queue::{Connector, QueueResult, Trigger, TriggerQueue};
use gridq_state::DeploymentId;

pub struct TriggerPublisher {
    connector: Arc<dyn Connector>,
    handle: Mutex<Option<Arc<dyn TriggerQueue>>>,
}

impl TriggerPublisher {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self {
            connector,
            handle: Mutex::new(None),
        }
    }

    /// Publish one trigger for `deployment_id`.
    pub async fn publish(&self, deployment_id: DeploymentId) -> QueueResult<()> {
        let queue = self.connected().await?;
        if let Err(e) = queue.publish(Trigger::new(deployment_id)).await {
            *self.handle.lock().await = None;
            return Err(e);
        }
        debug!(deployment_id, "scheduling trigger published");
        Ok(())
    }

    /// Deployments that already have a trigger pending or in flight.
    pub async fn queued_deployments(&self) -> QueueResult<HashSet<DeploymentId>> {
        let queue = self.connected().await?;
        match queue.queued_deployments().await {
            Ok(ids) => Ok(ids.into_iter().collect()),
            Err(e) => {
                *self.handle.lock().await = None;
                Err(e)
            }
        }
    }

    async fn connected(&self) -> QueueResult<Arc<dyn TriggerQueue>> {
        let mut handle = self.handle.lock().await;
        if let Some(queue) = handle.as_ref() {
            return Ok(queue.clone());
        }
        let queue = self.connector.connect().await?;
        *handle = Some(queue.clone());
        Ok(queue)
    }

    /// Publish a trigger for each id, in order. Returns how many were
    /// published; failures are logged and skipped.
    pub async fn publish_all<I>(&self, deployment_ids: I) -> usize
    where
        I: IntoIterator<Item = DeploymentId>,
    {
        let mut published = 0;
        for deployment_id in deployment_ids {
            match self.publish(deployment_id).await {
                Ok(()) => published += 1,
                Err(e) => warn!(deployment_id, error = %e, "failed to publish trigger"),
            }
        }
        published
    }
}
