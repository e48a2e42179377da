//! Bounded connect retry.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::error::{QueueError, QueueResult};
use crate::transport::{Connector, TriggerQueue};

/// Fixed attempt budget with a fixed delay between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            delay: Duration::from_secs(5),
        }
    }
}

/// Try to connect up to `policy.max_attempts` times, sleeping
/// `policy.delay` between attempts.
///
/// Returns [`QueueError::Unavailable`] once the budget is spent.
pub async fn connect_with_retry(
    connector: &dyn Connector,
    policy: RetryPolicy,
) -> QueueResult<Arc<dyn TriggerQueue>> {
    let attempts = policy.max_attempts.max(1);
    let mut last_error = None;

    for attempt in 1..=attempts {
        match connector.connect().await {
            Ok(queue) => {
                info!(attempt, "connected to work queue");
                return Ok(queue);
            }
            Err(e) => {
                warn!(attempt, max_attempts = attempts, error = %e, "work queue connect failed");
                last_error = Some(e);
                if attempt < attempts {
                    tokio::time::sleep(policy.delay).await;
                }
            }
        }
    }

    let reason = last_error.map(|e| e.to_string()).unwrap_or_default();
    Err(QueueError::Unavailable(format!(
        "gave up after {attempts} attempts: {reason}"
    )))
}
