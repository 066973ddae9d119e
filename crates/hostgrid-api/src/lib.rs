//! hostgrid-api: REST API for HostGrid.
//!
//! Thin axum layer over the [`Orchestrator`]. Every `/api/v1` request is
//! scoped to the tenant named by the `x-owner-id` header; projects owned by
//! someone else look like they don't exist.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/healthz` | Liveness |
//! | GET | `/api/v1/projects` | List the caller's projects |
//! | POST | `/api/v1/projects` | Create a project |
//! | GET | `/api/v1/projects/{id}` | Project with env vars and deployments |
//! | PUT | `/api/v1/projects/{id}` | Update the declared spec |
//! | DELETE | `/api/v1/projects/{id}` | Tear down and delete |
//! | PUT | `/api/v1/projects/{id}/env` | Replace env vars |
//! | POST | `/api/v1/projects/{id}/deploy` | Deploy a fresh container |
//! | POST | `/api/v1/projects/{id}/start` | Start the current deployment |
//! | POST | `/api/v1/projects/{id}/stop` | Stop the current deployment |
//! | POST | `/api/v1/projects/{id}/reconcile` | Re-read status from the engine |

pub mod handlers;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post, put};
use hostgrid_orchestrator::Orchestrator;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub orchestrator: Arc<Orchestrator>,
}

/// Build the complete API router.
pub fn build_router(orchestrator: Arc<Orchestrator>) -> Router {
    let api_state = ApiState { orchestrator };

    let api_routes = Router::new()
        .route(
            "/projects",
            get(handlers::list_projects).post(handlers::create_project),
        )
        .route(
            "/projects/{id}",
            get(handlers::get_project)
                .put(handlers::update_project)
                .delete(handlers::delete_project),
        )
        .route("/projects/{id}/env", put(handlers::set_env_vars))
        .route("/projects/{id}/deploy", post(handlers::deploy_project))
        .route("/projects/{id}/start", post(handlers::start_project))
        .route("/projects/{id}/stop", post(handlers::stop_project))
        .route("/projects/{id}/reconcile", post(handlers::reconcile_project))
        .with_state(api_state);

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/healthz", get(handlers::healthz))
}
