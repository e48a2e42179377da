//! gridq-api: REST API for gridq.
//!
//! Provides axum route handlers for registering clusters, submitting
//! deployments, and reporting deployment completion.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/api/v1/clusters` | List clusters (`?organization_id=`) |
//! | POST | `/api/v1/clusters` | Register a cluster |
//! | GET | `/api/v1/clusters/{id}` | Get cluster capacity |
//! | GET | `/api/v1/deployments` | List a cluster's deployments (`?cluster_id=&status=`) |
//! | POST | `/api/v1/deployments` | Submit a deployment |
//! | GET | `/api/v1/deployments/{id}` | Get deployment details |
//! | POST | `/api/v1/deployments/{id}/complete` | Report successful completion |
//! | POST | `/api/v1/deployments/{id}/fail` | Report failure or cancel while queued |
//! | POST | `/api/v1/deployments/{id}/retrigger` | Re-send a queued deployment's trigger |

pub mod handlers;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use gridq_scheduler::{LifecycleManager, SubmissionGateway};
use gridq_state::StateStore;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub store: StateStore,
    pub gateway: Arc<SubmissionGateway>,
    pub lifecycle: Arc<LifecycleManager>,
}

/// Build the complete API router.
pub fn build_router(state: ApiState) -> Router {
    let api_routes = Router::new()
        .route("/clusters", get(handlers::list_clusters).post(handlers::create_cluster))
        .route("/clusters/{id}", get(handlers::get_cluster))
        .route("/deployments", get(handlers::list_deployments).post(handlers::submit_deployment))
        .route("/deployments/{id}", get(handlers::get_deployment))
        .route("/deployments/{id}/complete", post(handlers::complete_deployment))
        .route("/deployments/{id}/fail", post(handlers::fail_deployment))
        .route("/deployments/{id}/retrigger", post(handlers::retrigger_deployment))
        .with_state(state);

    Router::new().nest("/api/v1", api_routes)
}
