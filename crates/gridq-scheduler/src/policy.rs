//! Admission policy: decides whether a queued deployment may start now.
//!
//! ```text
//! if another queued deployment on the cluster has priority > p:
//!     Defer(HigherPriorityQueued)
//! elif request <= available on ram, cpu, and gpu:
//!     Admit
//! else:
//!     Defer(InsufficientResources)
//! ```
//!
//! Priority is enforced per decision only: a low-priority deployment is
//! held back while a higher-priority one is waiting on the same cluster,
//! but nothing orders dispatch across the whole queue. A higher-priority
//! deployment submitted right after a low-priority one was admitted does
//! not displace it.

use std::fmt;

use gridq_state::{Cluster, Deployment, DeploymentStatus, Resources};

/// Outcome of one admission decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Reserve the request and start the deployment.
    Admit,
    /// Leave the deployment queued.
    Defer(DeferReason),
}

/// Why a deployment was left queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeferReason {
    /// A queued deployment with strictly higher priority is waiting on the
    /// same cluster.
    HigherPriorityQueued { waiting_priority: i64 },
    /// At least one resource dimension is short.
    InsufficientResources {
        requested: Resources,
        available: Resources,
    },
}

impl fmt::Display for DeferReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeferReason::HigherPriorityQueued { waiting_priority } => {
                write!(f, "higher priority deployment waiting (priority {waiting_priority})")
            }
            DeferReason::InsufficientResources {
                requested,
                available,
            } => write!(f, "insufficient resources (requested {requested}, available {available})"),
        }
    }
}

/// Decide for a request of `priority` against `available` capacity, given
/// the priorities of the other queued deployments on the same cluster.
pub fn decide<I>(request: &Resources, priority: i64, available: &Resources, others: I) -> Decision
where
    I: IntoIterator<Item = i64>,
{
    let waiting = others.into_iter().filter(|p| *p > priority).max();
    if let Some(waiting_priority) = waiting {
        return Decision::Defer(DeferReason::HigherPriorityQueued { waiting_priority });
    }

    if request.fits_within(available) {
        Decision::Admit
    } else {
        Decision::Defer(DeferReason::InsufficientResources {
            requested: *request,
            available: *available,
        })
    }
}

/// Decide for `deployment` on `cluster`. `queued` may include the
/// deployment itself and deployments of other clusters; both are ignored.
pub fn evaluate(deployment: &Deployment, cluster: &Cluster, queued: &[Deployment]) -> Decision {
    let others = queued
        .iter()
        .filter(|d| {
            d.id != deployment.id
                && d.cluster_id == cluster.id
                && d.status == DeploymentStatus::Queued
        })
        .map(|d| d.priority);
    decide(&deployment.request, deployment.priority, &cluster.available, others)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cluster(available: Resources) -> Cluster {
        Cluster {
            id: 1,
            name: "c".to_string(),
            organization_id: 1,
            total: Resources::new(1024, 4, 2),
            available,
            version: 0,
            created_at: 0,
        }
    }

    fn deployment(id: u64, request: Resources, priority: i64) -> Deployment {
        Deployment {
            id,
            cluster_id: 1,
            docker_image: "img".to_string(),
            request,
            priority,
            status: DeploymentStatus::Queued,
            created_at: 0,
            updated_at: 0,
        }
    }

    #[test]
    fn admits_when_alone_and_resources_fit() {
        let d = deployment(1, Resources::new(512, 2, 1), 1);
        let decision = evaluate(&d, &cluster(Resources::new(1024, 4, 2)), &[d.clone()]);
        assert_eq!(decision, Decision::Admit);
    }

    #[test]
    fn defers_when_any_dimension_is_short() {
        let d = deployment(1, Resources::new(1024, 4, 2), 1);
        let decision = evaluate(&d, &cluster(Resources::new(512, 2, 1)), &[]);
        assert!(matches!(
            decision,
            Decision::Defer(DeferReason::InsufficientResources { .. })
        ));

        let gpu_only = deployment(2, Resources::new(0, 0, 3), 1);
        let decision = evaluate(&gpu_only, &cluster(Resources::new(1024, 4, 2)), &[]);
        assert!(matches!(
            decision,
            Decision::Defer(DeferReason::InsufficientResources { .. })
        ));
    }

    #[test]
    fn zero_request_always_fits() {
        let d = deployment(1, Resources::default(), 0);
        assert_eq!(evaluate(&d, &cluster(Resources::default()), &[]), Decision::Admit);
    }

    #[test]
    fn higher_priority_waiting_defers_even_with_room() {
        let request = Resources::new(100, 1, 0);
        let high = deployment(1, request, 5);
        let low = deployment(2, request, 1);

        let decision = evaluate(&low, &cluster(Resources::new(1024, 4, 2)), &[high, low.clone()]);
        assert_eq!(
            decision,
            Decision::Defer(DeferReason::HigherPriorityQueued { waiting_priority: 5 })
        );
    }

    #[test]
    fn equal_priority_does_not_defer() {
        let request = Resources::new(100, 1, 0);
        let first = deployment(1, request, 3);
        let second = deployment(2, request, 3);
        assert_eq!(
            evaluate(&second, &cluster(Resources::new(1024, 4, 2)), &[first]),
            Decision::Admit
        );
    }

    #[test]
    fn priority_check_wins_over_resource_check() {
        let waiting = deployment(1, Resources::default(), 9);
        let d = deployment(2, Resources::new(4096, 0, 0), 1);
        assert!(matches!(
            evaluate(&d, &cluster(Resources::default()), &[waiting]),
            Decision::Defer(DeferReason::HigherPriorityQueued { waiting_priority: 9 })
        ));
    }

    #[test]
    fn other_clusters_and_non_queued_are_ignored() {
        let d = deployment(1, Resources::new(1, 1, 0), 1);
        let mut elsewhere = deployment(2, Resources::default(), 10);
        elsewhere.cluster_id = 2;
        let mut running = deployment(3, Resources::default(), 10);
        running.status = DeploymentStatus::Running;

        assert_eq!(
            evaluate(&d, &cluster(Resources::new(8, 8, 0)), &[elsewhere, running]),
            Decision::Admit
        );
    }

    #[test]
    fn reports_highest_waiting_priority() {
        let decision = decide(&Resources::default(), 0, &Resources::default(), [3, 7, -1, 5]);
        assert_eq!(
            decision,
            Decision::Defer(DeferReason::HigherPriorityQueued { waiting_priority: 7 })
        );
    }

    #[test]
    fn defer_reason_display() {
        let reason = DeferReason::InsufficientResources {
            requested: Resources::new(2, 1, 0),
            available: Resources::new(1, 1, 0),
        };
        assert_eq!(
            reason.to_string(),
            "insufficient resources (requested ram=2 cpu=1 gpu=0, available ram=1 cpu=1 gpu=0)"
        );
    }
}
