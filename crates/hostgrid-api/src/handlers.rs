//! REST API handlers.
//!
//! Each handler resolves the caller, delegates to the `Orchestrator`, and
//! returns the JSON envelope `{success, data?, error?}`.

use std::collections::BTreeMap;

use axum::Json;
use axum::extract::{FromRequestParts, Path, State};
use axum::http::StatusCode;
use axum::http::request::Parts;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use tracing::warn;

use hostgrid_core::ProjectSpec;
use hostgrid_orchestrator::OrchestratorError;
use hostgrid_runtime::RuntimeError;
use hostgrid_state::ProjectDetail;

use crate::ApiState;

/// Header naming the calling tenant.
pub const OWNER_HEADER: &str = "x-owner-id";

/// Response wrapper for consistent API format.
#[derive(serde::Serialize)]
struct ApiResponse<T: serde::Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: serde::Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> impl IntoResponse {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
}

pub fn error_status(err: &OrchestratorError) -> StatusCode {
    match err {
        OrchestratorError::Validation(_) => StatusCode::BAD_REQUEST,
        OrchestratorError::NotFound(_) => StatusCode::NOT_FOUND,
        OrchestratorError::Conflict(_) | OrchestratorError::NoDeployment(_) => {
            StatusCode::CONFLICT
        }
        OrchestratorError::Runtime(RuntimeError::Timeout(_)) => StatusCode::GATEWAY_TIMEOUT,
        OrchestratorError::Runtime(_) => StatusCode::BAD_GATEWAY,
        OrchestratorError::State(_) | OrchestratorError::Aborted(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

fn orchestrator_error(err: OrchestratorError) -> Response {
    let status = error_status(&err);
    if status.is_server_error() {
        warn!(%status, error = %err, "request failed");
    }
    error_response(&err.to_string(), status).into_response()
}

/// The calling tenant, from the `x-owner-id` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Owner(pub String);

impl<S: Send + Sync> FromRequestParts<S> for Owner {
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(OWNER_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(|v| Owner(v.to_string()))
            .ok_or_else(|| {
                error_response("missing x-owner-id header", StatusCode::UNAUTHORIZED)
                    .into_response()
            })
    }
}

/// Load a project the caller owns. Someone else's project is a 404.
fn owned_project(state: &ApiState, owner: &Owner, id: &str) -> Result<ProjectDetail, Response> {
    match state.orchestrator.get_project(id) {
        Ok(detail) if detail.project.owner_id == owner.0 => Ok(detail),
        Ok(_) => Err(error_response("project not found", StatusCode::NOT_FOUND).into_response()),
        Err(e) => Err(orchestrator_error(e)),
    }
}

// ── Health ─────────────────────────────────────────────────────

/// GET /healthz
pub async fn healthz() -> impl IntoResponse {
    ApiResponse::ok("ok")
}

// ── Projects ───────────────────────────────────────────────────

/// GET /api/v1/projects
pub async fn list_projects(State(state): State<ApiState>, owner: Owner) -> impl IntoResponse {
    match state.orchestrator.list_projects(&owner.0) {
        Ok(projects) => ApiResponse::ok(projects).into_response(),
        Err(e) => orchestrator_error(e),
    }
}

/// POST /api/v1/projects
pub async fn create_project(
    State(state): State<ApiState>,
    owner: Owner,
    Json(spec): Json<ProjectSpec>,
) -> impl IntoResponse {
    match state.orchestrator.create_project(&owner.0, &spec) {
        Ok(project) => (StatusCode::CREATED, ApiResponse::ok(project)).into_response(),
        Err(e) => orchestrator_error(e),
    }
}

/// GET /api/v1/projects/:id
pub async fn get_project(
    State(state): State<ApiState>,
    owner: Owner,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match owned_project(&state, &owner, &id) {
        Ok(detail) => ApiResponse::ok(detail).into_response(),
        Err(resp) => resp,
    }
}

/// PUT /api/v1/projects/:id
pub async fn update_project(
    State(state): State<ApiState>,
    owner: Owner,
    Path(id): Path<String>,
    Json(spec): Json<ProjectSpec>,
) -> impl IntoResponse {
    if let Err(resp) = owned_project(&state, &owner, &id) {
        return resp;
    }
    match state.orchestrator.update_project(&id, &spec).await {
        Ok(project) => ApiResponse::ok(project).into_response(),
        Err(e) => orchestrator_error(e),
    }
}

/// DELETE /api/v1/projects/:id
pub async fn delete_project(
    State(state): State<ApiState>,
    owner: Owner,
    Path(id): Path<String>,
) -> impl IntoResponse {
    if let Err(resp) = owned_project(&state, &owner, &id) {
        return resp;
    }
    match state.orchestrator.delete_project(&id).await {
        Ok(report) => ApiResponse::ok(report).into_response(),
        Err(e) => orchestrator_error(e),
    }
}

// ── Env vars ───────────────────────────────────────────────────

/// Env var replacement body.
#[derive(Debug, Deserialize)]
pub struct EnvRequest {
    pub vars: BTreeMap<String, String>,
}

/// PUT /api/v1/projects/:id/env
pub async fn set_env_vars(
    State(state): State<ApiState>,
    owner: Owner,
    Path(id): Path<String>,
    Json(req): Json<EnvRequest>,
) -> impl IntoResponse {
    if let Err(resp) = owned_project(&state, &owner, &id) {
        return resp;
    }
    match state.orchestrator.set_env_vars(&id, &req.vars).await {
        Ok(vars) => ApiResponse::ok(vars).into_response(),
        Err(e) => orchestrator_error(e),
    }
}

// ── Lifecycle ──────────────────────────────────────────────────

/// POST /api/v1/projects/:id/deploy
pub async fn deploy_project(
    State(state): State<ApiState>,
    owner: Owner,
    Path(id): Path<String>,
) -> impl IntoResponse {
    if let Err(resp) = owned_project(&state, &owner, &id) {
        return resp;
    }
    match state.orchestrator.deploy_project(&id).await {
        Ok(deployment) => (StatusCode::CREATED, ApiResponse::ok(deployment)).into_response(),
        Err(e) => orchestrator_error(e),
    }
}

/// POST /api/v1/projects/:id/start
pub async fn start_project(
    State(state): State<ApiState>,
    owner: Owner,
    Path(id): Path<String>,
) -> impl IntoResponse {
    if let Err(resp) = owned_project(&state, &owner, &id) {
        return resp;
    }
    match state.orchestrator.start_project(&id).await {
        Ok(project) => ApiResponse::ok(project).into_response(),
        Err(e) => orchestrator_error(e),
    }
}

/// POST /api/v1/projects/:id/stop
pub async fn stop_project(
    State(state): State<ApiState>,
    owner: Owner,
    Path(id): Path<String>,
) -> impl IntoResponse {
    if let Err(resp) = owned_project(&state, &owner, &id) {
        return resp;
    }
    match state.orchestrator.stop_project(&id).await {
        Ok(project) => ApiResponse::ok(project).into_response(),
        Err(e) => orchestrator_error(e),
    }
}

/// POST /api/v1/projects/:id/reconcile
pub async fn reconcile_project(
    State(state): State<ApiState>,
    owner: Owner,
    Path(id): Path<String>,
) -> impl IntoResponse {
    if let Err(resp) = owned_project(&state, &owner, &id) {
        return resp;
    }
    match state.orchestrator.reconcile_project(&id).await {
        Ok(project) => ApiResponse::ok(project).into_response(),
        Err(e) => orchestrator_error(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use hostgrid_core::ValidationError;
    use hostgrid_orchestrator::{Orchestrator, OrchestratorConfig};
    use hostgrid_runtime::MemoryRuntime;
    use hostgrid_state::{StateError, StateStore};

    fn test_state() -> ApiState {
        let store = Arc::new(StateStore::open_in_memory().unwrap());
        let runtime = Arc::new(MemoryRuntime::new());
        ApiState {
            orchestrator: Arc::new(Orchestrator::new(
                store,
                runtime,
                OrchestratorConfig::default(),
            )),
        }
    }

    fn owner(id: &str) -> Owner {
        Owner(id.to_string())
    }

    fn spec(subdomain: &str) -> ProjectSpec {
        ProjectSpec {
            name: "Blog".to_string(),
            image: "nginx:alpine".to_string(),
            subdomain: subdomain.to_string(),
            port: 80,
        }
    }

    async fn body_json(resp: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn status_mapping() {
        let cases = [
            (
                OrchestratorError::Validation(ValidationError::Port(0)),
                StatusCode::BAD_REQUEST,
            ),
            (
                OrchestratorError::NotFound("p".into()),
                StatusCode::NOT_FOUND,
            ),
            (OrchestratorError::Conflict("c".into()), StatusCode::CONFLICT),
            (
                OrchestratorError::NoDeployment("p".into()),
                StatusCode::CONFLICT,
            ),
            (
                OrchestratorError::Runtime(RuntimeError::Timeout("start".into())),
                StatusCode::GATEWAY_TIMEOUT,
            ),
            (
                OrchestratorError::Runtime(RuntimeError::Connection("refused".into())),
                StatusCode::BAD_GATEWAY,
            ),
            (
                OrchestratorError::State(StateError::Write("disk".into())),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (
                OrchestratorError::Aborted("deploy".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(error_status(&err), status, "{err}");
        }
    }

    #[tokio::test]
    async fn list_projects_empty() {
        let state = test_state();
        let resp = list_projects(State(state), owner("u1")).await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["data"], serde_json::json!([]));
    }

    #[tokio::test]
    async fn create_and_get_project() {
        let state = test_state();
        let resp = create_project(State(state.clone()), owner("u1"), Json(spec("blog")))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::CREATED);
        let id = body_json(resp).await["data"]["id"]
            .as_str()
            .unwrap()
            .to_string();

        let resp = get_project(State(state), owner("u1"), Path(id))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert_eq!(body["data"]["subdomain"], "blog");
        assert_eq!(body["data"]["status"], "created");
    }

    #[tokio::test]
    async fn create_invalid_subdomain_is_bad_request() {
        let state = test_state();
        let resp = create_project(State(state), owner("u1"), Json(spec("my blog")))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body = body_json(resp).await;
        assert_eq!(body["success"], false);
        assert!(body["error"].as_str().unwrap().contains("subdomain"));
    }

    #[tokio::test]
    async fn duplicate_subdomain_is_conflict() {
        let state = test_state();
        create_project(State(state.clone()), owner("u1"), Json(spec("blog"))).await;
        let resp = create_project(State(state), owner("u2"), Json(spec("blog")))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn other_tenants_project_is_not_found() {
        let state = test_state();
        let project = state
            .orchestrator
            .create_project("u1", &spec("blog"))
            .unwrap();

        let resp = get_project(State(state.clone()), owner("u2"), Path(project.id.clone()))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let resp = delete_project(State(state.clone()), owner("u2"), Path(project.id.clone()))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        assert!(state.orchestrator.get_project(&project.id).is_ok());
    }

    #[tokio::test]
    async fn start_without_deployment_is_conflict() {
        let state = test_state();
        let project = state
            .orchestrator
            .create_project("u1", &spec("blog"))
            .unwrap();
        let resp = start_project(State(state), owner("u1"), Path(project.id))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn deploy_returns_deployment_wire_shape() {
        let state = test_state();
        let project = state
            .orchestrator
            .create_project("u1", &spec("blog"))
            .unwrap();

        let resp = deploy_project(State(state), owner("u1"), Path(project.id))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::CREATED);
        let body = body_json(resp).await;
        assert_eq!(body["data"]["status"], "running");
        assert!(body["data"]["containerID"].is_string());
        assert!(body["data"]["deployedAt"].is_number());
    }

    #[tokio::test]
    async fn env_vars_with_bad_key_are_rejected() {
        let state = test_state();
        let project = state
            .orchestrator
            .create_project("u1", &spec("blog"))
            .unwrap();
        let req = EnvRequest {
            vars: BTreeMap::from([("BAD KEY".to_string(), "1".to_string())]),
        };
        let resp = set_env_vars(State(state), owner("u1"), Path(project.id), Json(req))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn healthz_ok() {
        let resp = healthz().await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
    }
}
