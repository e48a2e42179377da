//! In-process broker.
//!
//! Triggers live only in memory, so they do not survive a restart. Used
//! for tests and for running the gateway and worker in one process
//! without persistence of the queue itself. `refuse_next_connects` and
//! `disconnect` simulate an unreachable or dropped broker.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use tracing::debug;

use crate::error::{QueueError, QueueResult};
use crate::transport::{Connector, Delivery, TriggerQueue};
use crate::trigger::Trigger;

#[derive(Debug, Clone, Copy)]
struct Entry {
    trigger: Trigger,
    redelivered: bool,
    attempts: u32,
}

#[derive(Default)]
struct QueueState {
    pending: VecDeque<Entry>,
    in_flight: HashMap<u64, Entry>,
    next_tag: u64,
    closed: bool,
}

struct MemoryQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    prefetch: usize,
}

impl MemoryQueue {
    fn new(prefetch: usize) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
            prefetch: prefetch.max(1),
        }
    }
}

#[async_trait]
impl TriggerQueue for MemoryQueue {
    async fn publish(&self, trigger: Trigger) -> QueueResult<()> {
        let mut state = self.state.lock().await;
        if state.closed {
            return Err(QueueError::Closed);
        }
        state.pending.push_back(Entry {
            trigger,
            redelivered: false,
            attempts: 0,
        });
        drop(state);
        self.notify.notify_waiters();
        debug!(deployment_id = trigger.deployment_id, "trigger published");
        Ok(())
    }

    async fn receive(&self) -> QueueResult<Delivery> {
        loop {
            // Registered before the check so a publish in between is not missed.
            let notified = self.notify.notified();
            {
                let mut state = self.state.lock().await;
                if state.closed {
                    return Err(QueueError::Closed);
                }
                if state.in_flight.len() < self.prefetch {
                    if let Some(mut entry) = state.pending.pop_front() {
                        entry.attempts += 1;
                        state.next_tag += 1;
                        let tag = state.next_tag;
                        state.in_flight.insert(tag, entry);
                        return Ok(Delivery {
                            tag,
                            trigger: entry.trigger,
                            redelivered: entry.redelivered,
                            attempt: entry.attempts,
                        });
                    }
                }
            }
            notified.await;
        }
    }

    async fn ack(&self, tag: u64) -> QueueResult<()> {
        let mut state = self.state.lock().await;
        if state.closed {
            return Err(QueueError::Closed);
        }
        state
            .in_flight
            .remove(&tag)
            .ok_or(QueueError::UnknownDelivery(tag))?;
        drop(state);
        self.notify.notify_waiters();
        Ok(())
    }

    async fn requeue(&self, tag: u64) -> QueueResult<()> {
        let mut state = self.state.lock().await;
        if state.closed {
            return Err(QueueError::Closed);
        }
        let mut entry = state
            .in_flight
            .remove(&tag)
            .ok_or(QueueError::UnknownDelivery(tag))?;
        entry.redelivered = true;
        state.pending.push_back(entry);
        drop(state);
        self.notify.notify_waiters();
        Ok(())
    }

    async fn queued_deployments(&self) -> QueueResult<Vec<u64>> {
        let state = self.state.lock().await;
        Ok(state
            .pending
            .iter()
            .chain(state.in_flight.values())
            .map(|entry| entry.trigger.deployment_id)
            .collect())
    }
}

/// Connector for a single shared in-memory queue.
pub struct MemoryBroker {
    queue: Arc<MemoryQueue>,
    refuse_connects: AtomicU32,
    connect_attempts: AtomicU32,
}

impl MemoryBroker {
    /// Create a broker with single-credit flow control.
    pub fn new() -> Self {
        Self::with_prefetch(1)
    }

    /// Create a broker whose consumers may hold `prefetch` unacknowledged
    /// deliveries at once.
    pub fn with_prefetch(prefetch: usize) -> Self {
        Self {
            queue: Arc::new(MemoryQueue::new(prefetch)),
            refuse_connects: AtomicU32::new(0),
            connect_attempts: AtomicU32::new(0),
        }
    }

    /// Make the next `count` connection attempts fail.
    pub fn refuse_next_connects(&self, count: u32) {
        self.refuse_connects.store(count, Ordering::SeqCst);
    }

    /// Total connection attempts so far, successful or not.
    pub fn connect_attempts(&self) -> u32 {
        self.connect_attempts.load(Ordering::SeqCst)
    }

    /// Drop the connection. Unacknowledged deliveries go back to the
    /// front of the queue marked as redelivered; blocked receivers get
    /// [`QueueError::Closed`]. The next `connect` reopens the queue.
    pub async fn disconnect(&self) {
        let mut state = self.queue.state.lock().await;
        state.closed = true;
        let mut returned: Vec<(u64, Entry)> = state.in_flight.drain().collect();
        returned.sort_by_key(|(tag, _)| *tag);
        for (_, mut entry) in returned.into_iter().rev() {
            entry.redelivered = true;
            state.pending.push_front(entry);
        }
        drop(state);
        self.queue.notify.notify_waiters();
        debug!("memory broker disconnected");
    }

    /// Triggers waiting to be delivered.
    pub async fn pending(&self) -> usize {
        self.queue.state.lock().await.pending.len()
    }

    /// Deliveries handed out and not yet acknowledged.
    pub async fn unacked(&self) -> usize {
        self.queue.state.lock().await.in_flight.len()
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Connector for MemoryBroker {
    async fn connect(&self) -> QueueResult<Arc<dyn TriggerQueue>> {
        self.connect_attempts.fetch_add(1, Ordering::SeqCst);
        let refused = self
            .refuse_connects
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(QueueError::Unavailable("memory broker refused connection".to_string()));
        }
        self.queue.state.lock().await.closed = false;
        Ok(self.queue.clone())
    }
}
