//! REST API handlers.
//!
//! Reads go straight to `StateStore`; submissions and lifecycle changes go
//! through the scheduler so triggers and capacity stay in step.

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use tracing::error;

use gridq_scheduler::SchedulerError;
use gridq_state::*;

use crate::ApiState;

/// Response wrapper for consistent API format.
#[derive(Serialize)]
struct ApiResponse<T: Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> Response {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
        .into_response()
}

fn internal(e: impl std::fmt::Display) -> Response {
    error!(error = %e, "request failed");
    error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR)
}

fn scheduler_error(e: SchedulerError) -> Response {
    let status = match &e {
        SchedulerError::ClusterNotFound(_) | SchedulerError::DeploymentNotFound(_) => {
            StatusCode::NOT_FOUND
        }
        SchedulerError::InvalidTransition { .. }
        | SchedulerError::NotQueued { .. }
        | SchedulerError::Conflict { .. } => StatusCode::CONFLICT,
        SchedulerError::TransportUnavailable(_) | SchedulerError::Queue(_) => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        SchedulerError::State(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        error!(error = %e, "request failed");
    }
    error_response(&e.to_string(), status)
}

// ── Clusters ───────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct ClusterQuery {
    pub organization_id: Option<OrganizationId>,
}

/// GET /api/v1/clusters
pub async fn list_clusters(
    State(state): State<ApiState>,
    Query(query): Query<ClusterQuery>,
) -> impl IntoResponse {
    let clusters = match query.organization_id {
        Some(org) => state.store.list_clusters_for_organization(org),
        None => state.store.list_clusters(),
    };
    match clusters {
        Ok(clusters) => ApiResponse::ok(clusters).into_response(),
        Err(e) => internal(e),
    }
}

/// GET /api/v1/clusters/{id}
pub async fn get_cluster(
    State(state): State<ApiState>,
    Path(id): Path<ClusterId>,
) -> impl IntoResponse {
    match state.store.get_cluster(id) {
        Ok(Some(cluster)) => ApiResponse::ok(cluster).into_response(),
        Ok(None) => error_response("cluster not found", StatusCode::NOT_FOUND),
        Err(e) => internal(e),
    }
}

/// POST /api/v1/clusters
pub async fn create_cluster(
    State(state): State<ApiState>,
    Json(new): Json<NewCluster>,
) -> impl IntoResponse {
    if new.name.trim().is_empty() {
        return error_response("cluster name must not be empty", StatusCode::BAD_REQUEST);
    }
    match state.store.create_cluster(&new) {
        Ok(cluster) => (StatusCode::CREATED, ApiResponse::ok(cluster)).into_response(),
        Err(e) => internal(e),
    }
}

// ── Deployments ────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct DeploymentQuery {
    pub cluster_id: Option<ClusterId>,
    pub status: Option<String>,
}

/// Body of a successful submission.
#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub deployment_id: DeploymentId,
    pub deployment: Deployment,
    pub trigger_published: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

/// GET /api/v1/deployments?cluster_id=&status=
pub async fn list_deployments(
    State(state): State<ApiState>,
    Query(query): Query<DeploymentQuery>,
) -> impl IntoResponse {
    let Some(cluster_id) = query.cluster_id else {
        return error_response("cluster_id query parameter is required", StatusCode::BAD_REQUEST);
    };
    let status = match query.status.as_deref().map(str::parse::<DeploymentStatus>) {
        None => None,
        Some(Ok(status)) => Some(status),
        Some(Err(e)) => return error_response(&e, StatusCode::BAD_REQUEST),
    };
    match state.store.get_cluster(cluster_id) {
        Ok(Some(_)) => {}
        Ok(None) => return error_response("cluster not found", StatusCode::NOT_FOUND),
        Err(e) => return internal(e),
    }
    let deployments = match status {
        Some(status) => state.store.list_deployments_with_status(cluster_id, status),
        None => state.store.list_deployments(cluster_id),
    };
    match deployments {
        Ok(deployments) => ApiResponse::ok(deployments).into_response(),
        Err(e) => internal(e),
    }
}

/// GET /api/v1/deployments/{id}
pub async fn get_deployment(
    State(state): State<ApiState>,
    Path(id): Path<DeploymentId>,
) -> impl IntoResponse {
    match state.store.get_deployment(id) {
        Ok(Some(deployment)) => ApiResponse::ok(deployment).into_response(),
        Ok(None) => error_response("deployment not found", StatusCode::NOT_FOUND),
        Err(e) => internal(e),
    }
}

/// POST /api/v1/deployments
///
/// 201 once the deployment is stored, even when its trigger could not be
/// published (`trigger_published: false` plus a warning).
pub async fn submit_deployment(
    State(state): State<ApiState>,
    Json(new): Json<NewDeployment>,
) -> impl IntoResponse {
    if new.docker_image.trim().is_empty() {
        return error_response("docker_image must not be empty", StatusCode::BAD_REQUEST);
    }
    match state.gateway.submit(new).await {
        Ok(outcome) => (
            StatusCode::CREATED,
            ApiResponse::ok(SubmitResponse {
                deployment_id: outcome.deployment.id,
                deployment: outcome.deployment,
                trigger_published: outcome.trigger_published,
                warning: outcome.warning,
            }),
        )
            .into_response(),
        Err(e) => scheduler_error(e),
    }
}

/// POST /api/v1/deployments/{id}/complete
pub async fn complete_deployment(
    State(state): State<ApiState>,
    Path(id): Path<DeploymentId>,
) -> impl IntoResponse {
    match state.lifecycle.complete(id).await {
        Ok(deployment) => ApiResponse::ok(deployment).into_response(),
        Err(e) => scheduler_error(e),
    }
}

/// POST /api/v1/deployments/{id}/fail
pub async fn fail_deployment(
    State(state): State<ApiState>,
    Path(id): Path<DeploymentId>,
) -> impl IntoResponse {
    match state.lifecycle.fail(id).await {
        Ok(deployment) => ApiResponse::ok(deployment).into_response(),
        Err(e) => scheduler_error(e),
    }
}

/// POST /api/v1/deployments/{id}/retrigger
pub async fn retrigger_deployment(
    State(state): State<ApiState>,
    Path(id): Path<DeploymentId>,
) -> impl IntoResponse {
    match state.gateway.retrigger(id).await {
        Ok(()) => ApiResponse::ok("retriggered").into_response(),
        Err(e) => scheduler_error(e),
    }
}
