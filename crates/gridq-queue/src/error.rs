//! Queue transport error types.

use thiserror::Error;

/// Errors that can occur while talking to the work queue.
#[derive(Debug, Error)]
pub enum QueueError {
    /// No connection could be established.
    #[error("transport unavailable: {0}")]
    Unavailable(String),

    /// An established connection was lost.
    #[error("connection closed")]
    Closed,

    #[error("malformed trigger payload: {0}")]
    Codec(String),

    #[error("queue storage error: {0}")]
    Storage(#[from] gridq_state::StateError),

    /// Ack or requeue for a delivery this consumer does not hold.
    #[error("unknown delivery tag: {0}")]
    UnknownDelivery(u64),
}

pub type QueueResult<T> = Result<T, QueueError>;
