//! Queue re-scan: periodically re-triggers every queued deployment so a
//! deferred deployment is eventually re-evaluated even if no other event
//! on its cluster triggers it. Deployments that already have a trigger
//! waiting in the queue are skipped.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use gridq_state::StateStore;

use crate::error::SchedulerResult;
use crate::publisher::TriggerPublisher;

pub struct QueueRescanner {
    store: StateStore,
    publisher: Arc<TriggerPublisher>,
    interval: Duration,
}

impl QueueRescanner {
    pub fn new(store: StateStore, publisher: Arc<TriggerPublisher>, interval: Duration) -> Self {
        Self {
            store,
            publisher,
            interval,
        }
    }

    /// Publish a trigger for every queued deployment without one pending,
    /// cluster by cluster, highest priority first. Returns how many were
    /// published.
    pub async fn rescan_once(&self) -> SchedulerResult<usize> {
        let queued = self.store.list_all_queued()?;
        if queued.is_empty() {
            debug!("re-scan found no queued deployments");
            return Ok(0);
        }
        let pending = match self.publisher.queued_deployments().await {
            Ok(pending) => pending,
            Err(e) => {
                warn!(error = %e, "could not read pending triggers, re-triggering all");
                HashSet::new()
            }
        };
        let due: Vec<_> = queued
            .iter()
            .map(|d| d.id)
            .filter(|id| !pending.contains(id))
            .collect();
        let skipped = queued.len() - due.len();
        let published = self.publisher.publish_all(due).await;
        info!(
            queued = queued.len(),
            skipped,
            published,
            "re-scan triggered queued deployments"
        );
        Ok(published)
    }

    /// Re-scan every `interval` until `shutdown` fires.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(interval_secs = self.interval.as_secs(), "queue re-scan started");

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {
                    if let Err(e) = self.rescan_once().await {
                        warn!(error = %e, "queue re-scan failed");
                    }
                }
                _ = shutdown.changed() => {
                    info!("queue re-scan shutting down");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use gridq_queue::{Connector, MemoryBroker};
    use gridq_state::*;

    use super::*;

    fn setup() -> (StateStore, Arc<MemoryBroker>, QueueRescanner) {
        let store = StateStore::open_in_memory().unwrap();
        let broker = Arc::new(MemoryBroker::new());
        let publisher = Arc::new(TriggerPublisher::new(broker.clone()));
        let rescanner = QueueRescanner::new(store.clone(), publisher, Duration::from_millis(10));
        (store, broker, rescanner)
    }

    fn cluster(store: &StateStore) -> Cluster {
        store
            .create_cluster(&NewCluster {
                name: "scan".to_string(),
                organization_id: 1,
                total: Resources::new(4, 4, 0),
            })
            .unwrap()
    }

    fn submit(store: &StateStore, cluster_id: ClusterId, priority: i64) -> Deployment {
        store
            .insert_deployment(&NewDeployment {
                cluster_id,
                docker_image: "scan".to_string(),
                request: Resources::new(1, 1, 0),
                priority,
            })
            .unwrap()
    }

    #[tokio::test]
    async fn rescan_publishes_only_queued_in_priority_order() {
        let (store, broker, rescanner) = setup();
        let c = cluster(&store);
        let low = submit(&store, c.id, 1);
        let high = submit(&store, c.id, 7);
        let running = submit(&store, c.id, 3);
        store.commit_admission(running.id, 0).unwrap();

        assert_eq!(rescanner.rescan_once().await.unwrap(), 2);

        let queue = broker.connect().await.unwrap();
        let first = queue.receive().await.unwrap();
        assert_eq!(first.trigger.deployment_id, high.id);
        queue.ack(first.tag).await.unwrap();
        assert_eq!(queue.receive().await.unwrap().trigger.deployment_id, low.id);
    }

    #[tokio::test]
    async fn rescan_skips_deployments_with_pending_trigger() {
        let (store, broker, rescanner) = setup();
        let c = cluster(&store);
        submit(&store, c.id, 0);
        submit(&store, c.id, 0);

        assert_eq!(rescanner.rescan_once().await.unwrap(), 2);
        assert_eq!(rescanner.rescan_once().await.unwrap(), 0);
        assert_eq!(broker.pending().await, 2);

        submit(&store, c.id, 0);
        assert_eq!(rescanner.rescan_once().await.unwrap(), 1);
        assert_eq!(broker.pending().await, 3);
    }

    #[tokio::test]
    async fn rescan_of_empty_store_is_a_noop() {
        let (_, broker, rescanner) = setup();
        assert_eq!(rescanner.rescan_once().await.unwrap(), 0);
        assert_eq!(broker.pending().await, 0);
    }

    #[tokio::test]
    async fn run_stops_on_shutdown() {
        let (store, broker, rescanner) = setup();
        let c = cluster(&store);
        submit(&store, c.id, 0);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(async move { rescanner.run(shutdown_rx).await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();

        assert!(broker.pending().await >= 1);
    }
}
