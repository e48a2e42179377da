//! gridq-queue: work-queue transport for scheduling triggers.
//!
//! The submission path publishes one [`Trigger`] per deployment; the
//! scheduling worker consumes them one at a time and acknowledges each
//! only after its decision is committed. Delivery is at-least-once: a
//! delivery that is never acknowledged (worker crash, dropped connection,
//! explicit requeue) is delivered again.
//!
//! # Components
//!
//! - **`transport`**: the [`Connector`] / [`TriggerQueue`] contract
//! - **`memory`**: in-process broker, with failure injection for tests
//! - **`durable`**: broker whose pending triggers live in the state store
//! - **`retry`**: bounded connect retry with a fixed delay

pub mod durable;
pub mod error;
pub mod memory;
pub mod retry;
pub mod transport;
pub mod trigger;

pub use durable::DurableBroker;
pub use error::{QueueError, QueueResult};
pub use memory::MemoryBroker;
pub use retry::{RetryPolicy, connect_with_retry};
pub use transport::{Connector, Delivery, TriggerQueue};
pub use trigger::Trigger;
