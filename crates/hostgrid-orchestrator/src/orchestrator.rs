//! Orchestrator: project lifecycle over a container runtime.
//!
//! Each mutating operation runs under the project's lock and leaves the
//! store consistent with what the runtime did:
//! - Deploy: ensure image → create → retire previous → start → record
//! - Start / Stop: act on the current deployment's container
//! - Delete: tear down running containers (best effort), then cascade
//! - Update: mutate the declared spec only, flagging drift as `stale`
//! - Reconcile: read back the engine's view of the current container

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use hostgrid_core::{DaemonConfig, ProjectSpec, validate_env_vars};
use hostgrid_runtime::{ContainerRuntime, ContainerSpec, RuntimeError, RuntimeResult};
use hostgrid_state::*;

use crate::error::{OrchestratorError, OrchestratorResult};
use crate::locks::ProjectLocks;
use crate::retry::{RetryPolicy, bounded, retry_transient};
use crate::routing::{LABEL_DEPLOYMENT, container_labels, route_labels};

/// Tunables for the orchestrator, derived from the daemon config.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub base_domain: String,
    pub network: String,
    /// Deadline for a single runtime call.
    pub call_timeout: Duration,
    /// Deadline for pulling an image.
    pub pull_timeout: Duration,
    pub stop_grace: Duration,
    /// Backoff for idempotent reads and create retries.
    pub retry: RetryPolicy,
    pub create_attempts: u32,
}

impl From<&DaemonConfig> for OrchestratorConfig {
    fn from(config: &DaemonConfig) -> Self {
        Self {
            base_domain: config.routing.base_domain.clone(),
            network: config.routing.network.clone(),
            call_timeout: Duration::from_secs(config.runtime.call_timeout_secs),
            pull_timeout: Duration::from_secs(config.runtime.pull_timeout_secs),
            stop_grace: Duration::from_secs(config.runtime.stop_grace_secs),
            retry: RetryPolicy::with_attempts(config.runtime.inspect_attempts),
            create_attempts: config.runtime.create_attempts,
        }
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self::from(&DaemonConfig::default())
    }
}

/// Outcome of tearing down a project's containers during delete.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteReport {
    /// Container ids that were removed (or were already gone).
    pub removed: Vec<String>,
    pub failures: Vec<TeardownFailure>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TeardownFailure {
    #[serde(rename = "containerID")]
    pub container_id: String,
    pub error: String,
}

/// Container name for a new deployment: `<subdomain>-<8 hex>`.
fn container_name(subdomain: &str) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{subdomain}-{}", &suffix[..8])
}

#[derive(Clone)]
pub struct Orchestrator {
    store: Arc<dyn ProjectStore>,
    runtime: Arc<dyn ContainerRuntime>,
    config: OrchestratorConfig,
    locks: ProjectLocks,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn ProjectStore>,
        runtime: Arc<dyn ContainerRuntime>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            store,
            runtime,
            config,
            locks: ProjectLocks::new(),
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    fn load_project(&self, id: &str) -> OrchestratorResult<Project> {
        self.store
            .get_project(id)?
            .ok_or_else(|| OrchestratorError::NotFound(format!("project {id}")))
    }

    // ── Reads ──────────────────────────────────────────────────────

    pub fn list_projects(&self, owner_id: &str) -> OrchestratorResult<Vec<Project>> {
        Ok(self.store.list_projects_by_owner(owner_id)?)
    }

    pub fn get_project(&self, id: &str) -> OrchestratorResult<ProjectDetail> {
        self.store
            .get_project_detail(id)?
            .ok_or_else(|| OrchestratorError::NotFound(format!("project {id}")))
    }

    // ── Spec changes ───────────────────────────────────────────────

    pub fn create_project(&self, owner_id: &str, spec: &ProjectSpec) -> OrchestratorResult<Project> {
        let valid = spec.validate()?;
        let now = epoch_secs();
        let project = Project {
            id: Uuid::new_v4().to_string(),
            owner_id: owner_id.to_string(),
            name: valid.name,
            image: valid.image,
            subdomain: valid.subdomain,
            port: valid.port,
            status: ProjectStatus::Created,
            current_deployment_id: None,
            created_at: now,
            updated_at: now,
        };
        self.store.create_project(&project)?;
        info!(
            project_id = %project.id,
            %owner_id,
            subdomain = %project.subdomain,
            "project created"
        );
        Ok(project)
    }

    /// Change the declared spec. Running containers are left alone; if the
    /// live container no longer matches, the project becomes `stale`.
    pub async fn update_project(&self, id: &str, spec: &ProjectSpec) -> OrchestratorResult<Project> {
        let valid = spec.validate()?;
        let _guard = self.locks.acquire(id).await;

        let mut project = self.load_project(id)?;
        project.name = valid.name;
        project.image = valid.image;
        project.subdomain = valid.subdomain;
        project.port = valid.port;
        project.updated_at = epoch_secs();

        let current = self.store.current_deployment(id)?;
        project.status = match (&current, project.status) {
            (Some(d), ProjectStatus::Running)
                if d.status == DeploymentStatus::Running && d.drifted_from(&project) =>
            {
                ProjectStatus::Stale
            }
            (Some(d), ProjectStatus::Stale) if !d.drifted_from(&project) => ProjectStatus::Running,
            (_, status) => status,
        };

        self.store.update_project(&project)?;
        info!(project_id = %id, status = %project.status, "project updated");
        Ok(project)
    }

    /// Replace the project's environment. Takes effect on the next deploy.
    pub async fn set_env_vars(
        &self,
        id: &str,
        vars: &BTreeMap<String, String>,
    ) -> OrchestratorResult<Vec<EnvVar>> {
        validate_env_vars(vars)?;
        let _guard = self.locks.acquire(id).await;

        let entries: Vec<EnvVar> = vars
            .iter()
            .map(|(key, value)| EnvVar {
                project_id: id.to_string(),
                key: key.clone(),
                value: value.clone(),
            })
            .collect();
        self.store.set_env_vars(id, &entries)?;
        info!(project_id = %id, count = entries.len(), "env vars replaced");
        Ok(self.store.list_env_vars(id)?)
    }

    // ── Deploy ─────────────────────────────────────────────────────

    /// Create and start a fresh container for the project's current spec.
    ///
    /// A caller that queued behind a concurrent deploy of the same project
    /// gets that deploy's result instead of creating a second container. If
    /// that deploy failed, so does the caller.
    ///
    /// Once the lock is held the rollout runs as its own task and keeps the
    /// lock until the deployment is recorded. Dropping the returned future
    /// does not cancel it.
    pub async fn deploy_project(&self, id: &str) -> OrchestratorResult<Deployment> {
        let observed = self.load_project(id)?.current_deployment_id;
        let guard = self.locks.acquire(id).await;

        let project = self.load_project(id)?;
        if project.current_deployment_id != observed
            && let Some(winner) = self.store.current_deployment(id)?
        {
            if winner.status == DeploymentStatus::Failed {
                return Err(OrchestratorError::Conflict(format!(
                    "concurrent deploy of project {id} failed (deployment {})",
                    winner.id
                )));
            }
            info!(project_id = %id, deployment_id = %winner.id, "deploy coalesced with concurrent deploy");
            return Ok(winner);
        }

        let this = self.clone();
        let rollout = tokio::spawn(async move {
            let _guard = guard;
            this.roll_out(project).await
        });
        match rollout.await {
            Ok(result) => result,
            Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
            Err(err) => Err(OrchestratorError::Aborted(format!("deploy of project {id}: {err}"))),
        }
    }

    /// Pull, create, retire the previous container, start, record.
    async fn roll_out(&self, project: Project) -> OrchestratorResult<Deployment> {
        let id = project.id.as_str();
        let env_vars = self.store.list_env_vars(id)?;
        let previous = self.store.current_deployment(id)?;

        let deployment_id = Uuid::new_v4().to_string();
        let spec = ContainerSpec {
            name: container_name(&project.subdomain),
            image: project.image.clone(),
            env: env_vars.iter().map(EnvVar::to_env_string).collect(),
            labels: container_labels(
                route_labels(&project.subdomain, &self.config.base_domain, project.port),
                id,
                &deployment_id,
            ),
            port: project.port,
            network: self.config.network.clone(),
        };

        info!(project_id = %id, image = %project.image, name = %spec.name, "deploying");

        bounded(
            self.config.pull_timeout,
            "ensure image",
            self.runtime.ensure_image(&project.image),
        )
        .await?;
        let container_id = self.create_container(&spec, &deployment_id).await?;

        if let Some(previous) = &previous {
            if let Err(err) = self.teardown(&previous.container_id).await {
                warn!(
                    project_id = %id,
                    container_id = %previous.container_id,
                    error = %err,
                    "failed to retire previous container"
                );
            }
        }

        let record = Deployment {
            id: deployment_id,
            project_id: id.to_string(),
            seq: 0,
            container_id: container_id.clone(),
            container_name: spec.name.clone(),
            status: DeploymentStatus::Running,
            image: project.image.clone(),
            subdomain: project.subdomain.clone(),
            port: project.port,
            deployed_at: epoch_secs(),
        };

        if let Err(err) = bounded(
            self.config.call_timeout,
            "start container",
            self.runtime.start_container(&container_id),
        )
        .await
        {
            error!(project_id = %id, %container_id, error = %err, "container failed to start");
            self.discard(&container_id).await;
            let failed = Deployment {
                status: DeploymentStatus::Failed,
                ..record
            };
            self.store.record_deployment(failed, ProjectStatus::Failed)?;
            return Err(err.into());
        }

        match self.store.record_deployment(record, ProjectStatus::Running) {
            Ok(deployment) => {
                info!(
                    project_id = %id,
                    deployment_id = %deployment.id,
                    %container_id,
                    seq = deployment.seq,
                    "deployment running"
                );
                Ok(deployment)
            }
            Err(err) => {
                // Nothing references the container; don't leave it behind.
                error!(project_id = %id, %container_id, error = %err, "failed to record deployment");
                self.discard(&container_id).await;
                Err(err.into())
            }
        }
    }

    /// Create with retries on transient failures, reusing the same name. A
    /// retry that hits a name conflict adopts the container an earlier
    /// attempt created for this deployment.
    async fn create_container(
        &self,
        spec: &ContainerSpec,
        deployment_id: &str,
    ) -> OrchestratorResult<String> {
        let max_attempts = self.config.create_attempts.max(1);
        let mut attempt = 1;
        loop {
            let result = bounded(
                self.config.call_timeout,
                "create container",
                self.runtime.create_container(spec),
            )
            .await;
            match result {
                Ok(container_id) => return Ok(container_id),
                Err(RuntimeError::NameConflict(_)) if attempt > 1 => {
                    let existing = bounded(
                        self.config.call_timeout,
                        "inspect container",
                        self.runtime.inspect_container(&spec.name),
                    )
                    .await?;
                    if existing.labels.get(LABEL_DEPLOYMENT).map(String::as_str)
                        == Some(deployment_id)
                    {
                        debug!(name = %spec.name, container_id = %existing.id, "adopted container from earlier attempt");
                        return Ok(existing.id);
                    }
                    return Err(OrchestratorError::Conflict(format!(
                        "container name {} is in use",
                        spec.name
                    )));
                }
                Err(RuntimeError::NameConflict(_)) => {
                    return Err(OrchestratorError::Conflict(format!(
                        "container name {} is in use",
                        spec.name
                    )));
                }
                Err(err) if err.is_transient() && attempt < max_attempts => {
                    let delay = self.config.retry.delay_after(attempt);
                    warn!(name = %spec.name, attempt, ?delay, error = %err, "create failed, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) if err.is_transient() => {
                    // The engine may have created it anyway.
                    self.discard_unacknowledged(spec, deployment_id).await;
                    return Err(err.into());
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Remove the container a failed create left under this deployment's
    /// name, if there is one.
    async fn discard_unacknowledged(&self, spec: &ContainerSpec, deployment_id: &str) {
        let existing = bounded(
            self.config.call_timeout,
            "inspect container",
            self.runtime.inspect_container(&spec.name),
        )
        .await;
        match existing {
            Ok(info)
                if info.labels.get(LABEL_DEPLOYMENT).map(String::as_str) == Some(deployment_id) =>
            {
                warn!(name = %spec.name, container_id = %info.id, "removing container from unacknowledged create");
                self.discard(&info.id).await;
            }
            Ok(_) => {}
            Err(err) if err.is_not_found() => {}
            Err(err) => {
                warn!(name = %spec.name, error = %err, "could not check for container from unacknowledged create (may require manual cleanup)")
            }
        }
    }

    /// Stop then force-remove. A container that is already gone counts as
    /// torn down.
    async fn teardown(&self, container_id: &str) -> RuntimeResult<()> {
        let stop = bounded(
            self.config.call_timeout + self.config.stop_grace,
            "stop container",
            self.runtime.stop_container(container_id, self.config.stop_grace),
        )
        .await;
        match stop {
            Ok(()) => {}
            Err(err) if err.is_not_found() => return Ok(()),
            Err(err) => {
                warn!(%container_id, error = %err, "stop failed, forcing removal");
            }
        }

        match bounded(
            self.config.call_timeout,
            "remove container",
            self.runtime.remove_container(container_id, true),
        )
        .await
        {
            Err(err) if err.is_not_found() => Ok(()),
            result => result,
        }
    }

    /// Best-effort force-remove of a container nothing will reference.
    async fn discard(&self, container_id: &str) {
        let result = bounded(
            self.config.call_timeout,
            "remove container",
            self.runtime.remove_container(container_id, true),
        )
        .await;
        match result {
            Ok(()) => debug!(%container_id, "container discarded"),
            Err(err) if err.is_not_found() => {}
            Err(err) => {
                warn!(%container_id, error = %err, "failed to discard container (may require manual cleanup)")
            }
        }
    }

    // ── Start / Stop ───────────────────────────────────────────────

    fn current_or_fail(&self, id: &str) -> OrchestratorResult<(Project, Deployment)> {
        let project = self.load_project(id)?;
        match self.store.current_deployment(id)? {
            Some(current) => Ok((project, current)),
            None => Err(OrchestratorError::NoDeployment(id.to_string())),
        }
    }

    pub async fn start_project(&self, id: &str) -> OrchestratorResult<Project> {
        let _guard = self.locks.acquire(id).await;
        let (project, current) = self.current_or_fail(id)?;

        bounded(
            self.config.call_timeout,
            "start container",
            self.runtime.start_container(&current.container_id),
        )
        .await?;

        let status = if current.drifted_from(&project) {
            ProjectStatus::Stale
        } else {
            ProjectStatus::Running
        };
        let project = self.store.set_project_status(id, status)?;
        info!(project_id = %id, container_id = %current.container_id, %status, "project started");
        Ok(project)
    }

    pub async fn stop_project(&self, id: &str) -> OrchestratorResult<Project> {
        let _guard = self.locks.acquire(id).await;
        let (_, current) = self.current_or_fail(id)?;

        bounded(
            self.config.call_timeout + self.config.stop_grace,
            "stop container",
            self.runtime
                .stop_container(&current.container_id, self.config.stop_grace),
        )
        .await?;

        let project = self.store.set_project_status(id, ProjectStatus::Stopped)?;
        info!(project_id = %id, container_id = %current.container_id, "project stopped");
        Ok(project)
    }

    // ── Delete ─────────────────────────────────────────────────────

    /// Tear down every running deployment's container, then delete the
    /// project and everything it owns. Teardown failures are reported, not
    /// fatal.
    pub async fn delete_project(&self, id: &str) -> OrchestratorResult<DeleteReport> {
        let _guard = self.locks.acquire(id).await;
        let detail = self.get_project(id)?;

        let mut report = DeleteReport::default();
        for deployment in detail
            .deployments
            .iter()
            .filter(|d| d.status == DeploymentStatus::Running)
        {
            match self.teardown(&deployment.container_id).await {
                Ok(()) => report.removed.push(deployment.container_id.clone()),
                Err(err) => {
                    warn!(
                        project_id = %id,
                        container_id = %deployment.container_id,
                        error = %err,
                        "teardown failed during delete"
                    );
                    report.failures.push(TeardownFailure {
                        container_id: deployment.container_id.clone(),
                        error: err.to_string(),
                    });
                }
            }
        }

        self.store.delete_project(id)?;
        info!(
            project_id = %id,
            removed = report.removed.len(),
            failures = report.failures.len(),
            "project deleted"
        );
        Ok(report)
    }

    // ── Reconcile ──────────────────────────────────────────────────

    /// Re-derive the project status from the engine's view of the current
    /// container.
    pub async fn reconcile_project(&self, id: &str) -> OrchestratorResult<Project> {
        let _guard = self.locks.acquire(id).await;
        let project = self.load_project(id)?;
        let Some(current) = self.store.current_deployment(id)? else {
            return Ok(project);
        };

        let runtime = &self.runtime;
        let call_timeout = self.config.call_timeout;
        let container_id = current.container_id.as_str();
        let inspected = retry_transient(&self.config.retry, "inspect container", move || {
            bounded(
                call_timeout,
                "inspect container",
                runtime.inspect_container(container_id),
            )
        })
        .await;

        let status = match inspected {
            Ok(info) if info.state.is_live() => {
                if current.drifted_from(&project) {
                    ProjectStatus::Stale
                } else {
                    ProjectStatus::Running
                }
            }
            Ok(_) => ProjectStatus::Stopped,
            Err(err) if err.is_not_found() => ProjectStatus::Failed,
            Err(err) => return Err(err.into()),
        };

        if status == project.status {
            debug!(project_id = %id, %status, "project in sync");
            return Ok(project);
        }
        let updated = self.store.set_project_status(id, status)?;
        info!(project_id = %id, from = %project.status, to = %status, "project reconciled");
        Ok(updated)
    }
}
