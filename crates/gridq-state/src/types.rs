//! Domain types for the gridq state store.
//!
//! These types represent the persisted state of clusters and deployments.
//! All types are serializable to/from JSON for storage in redb tables.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Numeric identifier of a cluster.
pub type ClusterId = u64;

/// Numeric identifier of a deployment.
pub type DeploymentId = u64;

/// Identifier of the organization that owns a cluster.
pub type OrganizationId = u64;

// ── Resources ─────────────────────────────────────────────────────

/// A bundle of RAM, CPU, and GPU units.
///
/// Used both for cluster capacity and for what a deployment requests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resources {
    pub ram: u64,
    pub cpu: u64,
    pub gpu: u64,
}

impl Resources {
    pub const fn new(ram: u64, cpu: u64, gpu: u64) -> Self {
        Self { ram, cpu, gpu }
    }

    /// True when every dimension of `self` is at most the matching
    /// dimension of `available`.
    pub fn fits_within(&self, available: &Resources) -> bool {
        self.ram <= available.ram && self.cpu <= available.cpu && self.gpu <= available.gpu
    }

    /// Subtract `amount` from every dimension, or `None` if any dimension
    /// would go negative.
    pub fn checked_sub(&self, amount: &Resources) -> Option<Resources> {
        Some(Resources {
            ram: self.ram.checked_sub(amount.ram)?,
            cpu: self.cpu.checked_sub(amount.cpu)?,
            gpu: self.gpu.checked_sub(amount.gpu)?,
        })
    }

    /// Add `amount` to every dimension, or `None` if any dimension would
    /// exceed `cap`.
    pub fn checked_add_within(&self, amount: &Resources, cap: &Resources) -> Option<Resources> {
        let sum = Resources {
            ram: self.ram.checked_add(amount.ram)?,
            cpu: self.cpu.checked_add(amount.cpu)?,
            gpu: self.gpu.checked_add(amount.gpu)?,
        };
        sum.fits_within(cap).then_some(sum)
    }
}

impl fmt::Display for Resources {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ram={} cpu={} gpu={}", self.ram, self.cpu, self.gpu)
    }
}

// ── Cluster ───────────────────────────────────────────────────────

/// A capacity pool that deployments are admitted onto.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Cluster {
    pub id: ClusterId,
    pub name: String,
    pub organization_id: OrganizationId,
    /// Capacity fixed at creation.
    pub total: Resources,
    /// Capacity not reserved by any running deployment.
    pub available: Resources,
    /// Bumped on every change to `available`.
    pub version: u64,
    /// Unix timestamp (seconds) when this cluster was registered.
    pub created_at: u64,
}

impl Cluster {
    /// `0 <= available <= total` on every dimension.
    pub fn is_consistent(&self) -> bool {
        self.available.fits_within(&self.total)
    }
}

/// Input for registering a cluster.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewCluster {
    pub name: String,
    pub organization_id: OrganizationId,
    pub total: Resources,
}

// ── Deployment ────────────────────────────────────────────────────

/// Lifecycle status of a deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

impl DeploymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentStatus::Queued => "queued",
            DeploymentStatus::Running => "running",
            DeploymentStatus::Completed => "completed",
            DeploymentStatus::Failed => "failed",
        }
    }

    /// Terminal states never transition again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, DeploymentStatus::Completed | DeploymentStatus::Failed)
    }
}

impl fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DeploymentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "queued" => Ok(DeploymentStatus::Queued),
            "running" => Ok(DeploymentStatus::Running),
            "completed" => Ok(DeploymentStatus::Completed),
            "failed" => Ok(DeploymentStatus::Failed),
            other => Err(format!("unknown deployment status: {other}")),
        }
    }
}

/// A containerized job requesting a fixed slice of one cluster.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Deployment {
    pub id: DeploymentId,
    /// Fixed at creation; deployments never migrate.
    pub cluster_id: ClusterId,
    /// Opaque image reference, not interpreted by the scheduler.
    pub docker_image: String,
    pub request: Resources,
    /// Higher is more urgent. Not unique.
    pub priority: i64,
    pub status: DeploymentStatus,
    pub created_at: u64,
    pub updated_at: u64,
}

/// Input for submitting a deployment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewDeployment {
    pub cluster_id: ClusterId,
    pub docker_image: String,
    pub request: Resources,
    pub priority: i64,
}

/// A pending trigger payload as stored in the durable queue table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredTrigger {
    pub seq: u64,
    pub payload: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fits_within_checks_every_dimension() {
        let available = Resources::new(512, 2, 1);
        assert!(Resources::new(512, 2, 1).fits_within(&available));
        assert!(Resources::default().fits_within(&available));
        assert!(!Resources::new(513, 2, 1).fits_within(&available));
        assert!(!Resources::new(0, 0, 2).fits_within(&available));
    }

    #[test]
    fn checked_sub_refuses_to_go_negative() {
        let available = Resources::new(1024, 4, 2);
        assert_eq!(
            available.checked_sub(&Resources::new(512, 2, 1)),
            Some(Resources::new(512, 2, 1))
        );
        assert_eq!(available.checked_sub(&Resources::new(0, 5, 0)), None);
    }

    #[test]
    fn checked_add_within_respects_cap() {
        let total = Resources::new(1024, 4, 2);
        let available = Resources::new(512, 2, 1);
        assert_eq!(
            available.checked_add_within(&Resources::new(512, 2, 1), &total),
            Some(total)
        );
        assert_eq!(available.checked_add_within(&Resources::new(1, 0, 0), &available), None);
    }

    #[test]
    fn status_round_trips_through_strings() {
        for status in [
            DeploymentStatus::Queued,
            DeploymentStatus::Running,
            DeploymentStatus::Completed,
            DeploymentStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<DeploymentStatus>(), Ok(status));
        }
        assert!("paused".parse::<DeploymentStatus>().is_err());
        assert_eq!(
            serde_json::to_string(&DeploymentStatus::Running).unwrap(),
            "\"running\""
        );
    }

    #[test]
    fn terminal_states() {
        assert!(!DeploymentStatus::Queued.is_terminal());
        assert!(!DeploymentStatus::Running.is_terminal());
        assert!(DeploymentStatus::Completed.is_terminal());
        assert!(DeploymentStatus::Failed.is_terminal());
    }
}
