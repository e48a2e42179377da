//! Trigger message: the payload of one queue message.

use serde::{Deserialize, Serialize};

use gridq_state::DeploymentId;

use crate::error::{QueueError, QueueResult};

/// Notification that a deployment is ready for a scheduling decision.
///
/// Serialized as `{"deployment_id": <int>}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trigger {
    pub deployment_id: DeploymentId,
}

impl Trigger {
    pub fn new(deployment_id: DeploymentId) -> Self {
        Self { deployment_id }
    }

    pub fn encode(&self) -> QueueResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| QueueError::Codec(e.to_string()))
    }

    pub fn decode(payload: &[u8]) -> QueueResult<Self> {
        serde_json::from_slice(payload).map_err(|e| QueueError::Codec(e.to_string()))
    }
}
