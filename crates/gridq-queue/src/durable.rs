//! Durable broker backed by the state store's trigger table.
//!
//! A published trigger is a row in the `triggers` table until it is
//! acknowledged. Rows handed out but not acknowledged when the process
//! stops are delivered again after restart, which gives at-least-once
//! delivery across crashes. Delivery tags are the row sequence numbers; a
//! requeued trigger is re-inserted under a new one, behind every trigger
//! already pending.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, warn};

use gridq_state::StateStore;

use crate::error::{QueueError, QueueResult};
use crate::transport::{Connector, Delivery, TriggerQueue};
use crate::trigger::Trigger;

#[derive(Default)]
struct Credits {
    /// Tags handed out and not yet acknowledged or requeued.
    in_flight: HashSet<u64>,
    /// Deliveries per tag made by this process. Carried over when a
    /// requeue moves a trigger to a new tag.
    attempts: HashMap<u64, u32>,
}

struct DurableQueue {
    store: StateStore,
    credits: Mutex<Credits>,
    notify: Notify,
    prefetch: usize,
}

#[async_trait]
impl TriggerQueue for DurableQueue {
    async fn publish(&self, trigger: Trigger) -> QueueResult<()> {
        let payload = trigger.encode()?;
        let seq = self.store.enqueue_trigger(&payload)?;
        self.notify.notify_waiters();
        debug!(deployment_id = trigger.deployment_id, seq, "trigger persisted");
        Ok(())
    }

    async fn receive(&self) -> QueueResult<Delivery> {
        loop {
            let notified = self.notify.notified();
            {
                let mut credits = self.credits.lock().await;
                if credits.in_flight.len() < self.prefetch {
                    for stored in self.store.list_triggers()? {
                        if credits.in_flight.contains(&stored.seq) {
                            continue;
                        }
                        let trigger = match Trigger::decode(&stored.payload) {
                            Ok(trigger) => trigger,
                            Err(e) => {
                                warn!(seq = stored.seq, error = %e, "dropping undecodable trigger");
                                self.store.remove_trigger(stored.seq)?;
                                continue;
                            }
                        };
                        credits.in_flight.insert(stored.seq);
                        let attempt = credits.attempts.entry(stored.seq).or_insert(0);
                        *attempt += 1;
                        return Ok(Delivery {
                            tag: stored.seq,
                            trigger,
                            redelivered: *attempt > 1,
                            attempt: *attempt,
                        });
                    }
                }
            }
            notified.await;
        }
    }

    async fn ack(&self, tag: u64) -> QueueResult<()> {
        let mut credits = self.credits.lock().await;
        if !credits.in_flight.remove(&tag) {
            return Err(QueueError::UnknownDelivery(tag));
        }
        credits.attempts.remove(&tag);
        self.store.remove_trigger(tag)?;
        drop(credits);
        self.notify.notify_waiters();
        Ok(())
    }

    async fn requeue(&self, tag: u64) -> QueueResult<()> {
        let mut credits = self.credits.lock().await;
        if !credits.in_flight.remove(&tag) {
            return Err(QueueError::UnknownDelivery(tag));
        }
        let attempts = credits.attempts.remove(&tag).unwrap_or(0);
        if let Some(new_tag) = self.store.requeue_trigger(tag)? {
            credits.attempts.insert(new_tag, attempts);
            debug!(tag, new_tag, attempts, "trigger requeued");
        }
        drop(credits);
        self.notify.notify_waiters();
        Ok(())
    }

    async fn queued_deployments(&self) -> QueueResult<Vec<u64>> {
        Ok(self
            .store
            .list_triggers()?
            .iter()
            .filter_map(|stored| Trigger::decode(&stored.payload).ok())
            .map(|trigger| trigger.deployment_id)
            .collect())
    }
}

/// Connector for the durable queue. Connecting never fails; the queue is
/// as available as the store it lives in.
#[derive(Clone)]
pub struct DurableBroker {
    queue: Arc<DurableQueue>,
}

impl DurableBroker {
    /// Create a broker with single-credit flow control.
    pub fn new(store: StateStore) -> Self {
        Self::with_prefetch(store, 1)
    }

    pub fn with_prefetch(store: StateStore, prefetch: usize) -> Self {
        Self {
            queue: Arc::new(DurableQueue {
                store,
                credits: Mutex::new(Credits::default()),
                notify: Notify::new(),
                prefetch: prefetch.max(1),
            }),
        }
    }
}

#[async_trait]
impl Connector for DurableBroker {
    async fn connect(&self) -> QueueResult<Arc<dyn TriggerQueue>> {
        Ok(self.queue.clone())
    }
}
