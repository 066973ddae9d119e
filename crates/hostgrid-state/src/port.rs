//! The store contract consumed by the orchestrator.

use crate::error::StateResult;
use crate::types::*;

/// CRUD over projects, env vars, and deployment history.
///
/// Implementations must make every method atomic on its own: a reader never
/// observes half of a `record_deployment` or half of a cascade delete.
/// Ordering of deployment history is owned by the store (`seq`), never by
/// the caller.
pub trait ProjectStore: Send + Sync {
    /// Insert a new project. Fails with `Conflict` if its subdomain is taken.
    fn create_project(&self, project: &Project) -> StateResult<()>;

    fn get_project(&self, id: &str) -> StateResult<Option<Project>>;

    /// Project with env vars and deployments (ascending `seq`) from one
    /// read snapshot.
    fn get_project_detail(&self, id: &str) -> StateResult<Option<ProjectDetail>>;

    fn list_projects_by_owner(&self, owner_id: &str) -> StateResult<Vec<Project>>;

    /// Overwrite a project's fields, re-indexing its subdomain. Fails with
    /// `NotFound` if it does not exist and `Conflict` if the new subdomain
    /// belongs to another project.
    fn update_project(&self, project: &Project) -> StateResult<()>;

    /// Set only the status (and `updated_at`) and return the stored project.
    fn set_project_status(&self, id: &str, status: ProjectStatus) -> StateResult<Project>;

    /// Delete a project and everything it owns. Returns true if it existed.
    fn delete_project(&self, id: &str) -> StateResult<bool>;

    /// Replace the project's env var set.
    fn set_env_vars(&self, project_id: &str, vars: &[EnvVar]) -> StateResult<()>;

    fn list_env_vars(&self, project_id: &str) -> StateResult<Vec<EnvVar>>;

    /// Append a deployment, assigning its `seq`, and in the same transaction
    /// make it the project's current deployment and set the project status.
    fn record_deployment(
        &self,
        deployment: Deployment,
        project_status: ProjectStatus,
    ) -> StateResult<Deployment>;

    /// The deployment the project's current pointer refers to.
    fn current_deployment(&self, project_id: &str) -> StateResult<Option<Deployment>>;

    /// Deployment history in ascending `seq` order.
    fn list_deployments(&self, project_id: &str) -> StateResult<Vec<Deployment>>;
}
