//! Transport contract between the submission path and the worker.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::QueueResult;
use crate::trigger::Trigger;

/// A trigger handed to a consumer, pending acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Identifies this delivery for `ack` / `requeue`.
    pub tag: u64,
    pub trigger: Trigger,
    /// True if this trigger was handed out before and not acknowledged.
    pub redelivered: bool,
    /// How many times this broker has handed the trigger out, this
    /// delivery included.
    pub attempt: u32,
}

/// A connected handle to the trigger queue.
///
/// A consumer holds at most `prefetch` unacknowledged deliveries (one by
/// default); `receive` waits until the consumer has credit and a trigger
/// is pending.
#[async_trait]
pub trait TriggerQueue: Send + Sync {
    /// Enqueue a trigger.
    async fn publish(&self, trigger: Trigger) -> QueueResult<()>;

    /// Wait for the next trigger. Cancel-safe: dropping the future before
    /// it resolves never loses a trigger.
    async fn receive(&self) -> QueueResult<Delivery>;

    /// The delivery was fully handled; drop it for good.
    async fn ack(&self, tag: u64) -> QueueResult<()>;

    /// The delivery was not handled; make it available again behind every
    /// trigger already pending.
    async fn requeue(&self, tag: u64) -> QueueResult<()>;

    /// Deployment ids with a trigger pending or in flight.
    async fn queued_deployments(&self) -> QueueResult<Vec<u64>>;
}

/// Establishes connections to a trigger queue.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> QueueResult<Arc<dyn TriggerQueue>>;
}
