//! StateStore: redb-backed persistence for HostGrid.
//!
//! Implements [`ProjectStore`] over four tables (projects, subdomain index,
//! env vars, deployments). All values are JSON-serialized into redb's
//! `&[u8]` value columns. The store supports both on-disk and in-memory
//! backends (the latter for testing and dry runs).

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable, Table};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::port::ProjectStore;
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

fn encode<T: Serialize>(value: &T) -> StateResult<Vec<u8>> {
    serde_json::to_vec(value).map_err(map_err!(Serialize))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> StateResult<T> {
    serde_json::from_slice(bytes).map_err(map_err!(Deserialize))
}

/// Decode every child record of a project, in key order.
fn read_children<T, R>(table: &R, project_id: &str) -> StateResult<Vec<T>>
where
    T: DeserializeOwned,
    R: ReadableTable<&'static str, &'static [u8]>,
{
    let (start, end) = child_range(project_id);
    let mut results = Vec::new();
    for entry in table
        .range(start.as_str()..end.as_str())
        .map_err(map_err!(Read))?
    {
        let (_, value) = entry.map_err(map_err!(Read))?;
        results.push(decode(value.value())?);
    }
    Ok(results)
}

/// Delete every child record of a project. Returns number deleted.
fn remove_children(
    table: &mut Table<'_, &'static str, &'static [u8]>,
    project_id: &str,
) -> StateResult<u32> {
    let (start, end) = child_range(project_id);
    // Collect keys first; the range borrows the table.
    let keys: Vec<String> = table
        .range(start.as_str()..end.as_str())
        .map_err(map_err!(Read))?
        .map(|entry| entry.map(|(key, _)| key.value().to_string()))
        .collect::<Result<_, _>>()
        .map_err(map_err!(Read))?;
    for key in &keys {
        table.remove(key.as_str()).map_err(map_err!(Write))?;
    }
    Ok(keys.len() as u32)
}

fn read_project<R>(table: &R, id: &str) -> StateResult<Option<Project>>
where
    R: ReadableTable<&'static str, &'static [u8]>,
{
    match table.get(id).map_err(map_err!(Read))? {
        Some(guard) => Ok(Some(decode(guard.value())?)),
        None => Ok(None),
    }
}

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store.
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(PROJECTS).map_err(map_err!(Table))?;
        txn.open_table(SUBDOMAINS).map_err(map_err!(Table))?;
        txn.open_table(ENV_VARS).map_err(map_err!(Table))?;
        txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Which project owns a subdomain, if any.
    pub fn project_for_subdomain(&self, subdomain: &str) -> StateResult<Option<ProjectId>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(SUBDOMAINS).map_err(map_err!(Table))?;
        Ok(table
            .get(subdomain)
            .map_err(map_err!(Read))?
            .map(|guard| guard.value().to_string()))
    }
}

impl ProjectStore for StateStore {
    // ── Projects ───────────────────────────────────────────────────

    fn create_project(&self, project: &Project) -> StateResult<()> {
        let value = encode(project)?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut subdomains = txn.open_table(SUBDOMAINS).map_err(map_err!(Table))?;
            let mut projects = txn.open_table(PROJECTS).map_err(map_err!(Table))?;

            // Returning before commit drops (aborts) the transaction.
            if subdomains
                .get(project.subdomain.as_str())
                .map_err(map_err!(Read))?
                .is_some()
            {
                return Err(StateError::Conflict(format!(
                    "subdomain {} is already taken",
                    project.subdomain
                )));
            }
            if projects
                .get(project.id.as_str())
                .map_err(map_err!(Read))?
                .is_some()
            {
                return Err(StateError::Conflict(format!(
                    "project {} already exists",
                    project.id
                )));
            }

            subdomains
                .insert(project.subdomain.as_str(), project.id.as_str())
                .map_err(map_err!(Write))?;
            projects
                .insert(project.id.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(project_id = %project.id, subdomain = %project.subdomain, "project stored");
        Ok(())
    }

    fn get_project(&self, id: &str) -> StateResult<Option<Project>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(PROJECTS).map_err(map_err!(Table))?;
        read_project(&table, id)
    }

    fn get_project_detail(&self, id: &str) -> StateResult<Option<ProjectDetail>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let projects = txn.open_table(PROJECTS).map_err(map_err!(Table))?;
        let Some(project) = read_project(&projects, id)? else {
            return Ok(None);
        };
        let env_table = txn.open_table(ENV_VARS).map_err(map_err!(Table))?;
        let deployment_table = txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
        Ok(Some(ProjectDetail {
            project,
            env_vars: read_children(&env_table, id)?,
            deployments: read_children(&deployment_table, id)?,
        }))
    }

    fn list_projects_by_owner(&self, owner_id: &str) -> StateResult<Vec<Project>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(PROJECTS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let project: Project = decode(value.value())?;
            if project.owner_id == owner_id {
                results.push(project);
            }
        }
        results.sort_by(|a, b| (a.created_at, &a.id).cmp(&(b.created_at, &b.id)));
        Ok(results)
    }

    fn update_project(&self, project: &Project) -> StateResult<()> {
        let value = encode(project)?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut projects = txn.open_table(PROJECTS).map_err(map_err!(Table))?;
            let mut subdomains = txn.open_table(SUBDOMAINS).map_err(map_err!(Table))?;

            let existing = read_project(&projects, &project.id)?
                .ok_or_else(|| StateError::NotFound(format!("project {}", project.id)))?;

            if existing.subdomain != project.subdomain {
                let owner = subdomains
                    .get(project.subdomain.as_str())
                    .map_err(map_err!(Read))?
                    .map(|guard| guard.value().to_string());
                if owner.is_some_and(|owner| owner != project.id) {
                    return Err(StateError::Conflict(format!(
                        "subdomain {} is already taken",
                        project.subdomain
                    )));
                }
                subdomains
                    .remove(existing.subdomain.as_str())
                    .map_err(map_err!(Write))?;
                subdomains
                    .insert(project.subdomain.as_str(), project.id.as_str())
                    .map_err(map_err!(Write))?;
            }

            projects
                .insert(project.id.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(project_id = %project.id, "project updated");
        Ok(())
    }

    fn set_project_status(&self, id: &str, status: ProjectStatus) -> StateResult<Project> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let project = {
            let mut projects = txn.open_table(PROJECTS).map_err(map_err!(Table))?;
            let mut project = read_project(&projects, id)?
                .ok_or_else(|| StateError::NotFound(format!("project {id}")))?;
            project.status = status;
            project.updated_at = epoch_secs();
            let value = encode(&project)?;
            projects
                .insert(id, value.as_slice())
                .map_err(map_err!(Write))?;
            project
        };
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(project_id = %id, %status, "project status stored");
        Ok(project)
    }

    fn delete_project(&self, id: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut projects = txn.open_table(PROJECTS).map_err(map_err!(Table))?;
            let Some(project) = read_project(&projects, id)? else {
                return Ok(false);
            };
            projects.remove(id).map_err(map_err!(Write))?;

            let mut subdomains = txn.open_table(SUBDOMAINS).map_err(map_err!(Table))?;
            subdomains
                .remove(project.subdomain.as_str())
                .map_err(map_err!(Write))?;

            let mut env_vars = txn.open_table(ENV_VARS).map_err(map_err!(Table))?;
            let env_removed = remove_children(&mut env_vars, id)?;

            let mut deployments = txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
            let deployments_removed = remove_children(&mut deployments, id)?;

            debug!(
                project_id = %id,
                env_removed,
                deployments_removed,
                "project children deleted"
            );
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(project_id = %id, "project deleted");
        Ok(true)
    }

    // ── Env vars ───────────────────────────────────────────────────

    fn set_env_vars(&self, project_id: &str, vars: &[EnvVar]) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let projects = txn.open_table(PROJECTS).map_err(map_err!(Table))?;
            if read_project(&projects, project_id)?.is_none() {
                return Err(StateError::NotFound(format!("project {project_id}")));
            }

            let mut table = txn.open_table(ENV_VARS).map_err(map_err!(Table))?;
            remove_children(&mut table, project_id)?;
            for var in vars {
                let value = encode(var)?;
                table
                    .insert(env_key(project_id, &var.key).as_str(), value.as_slice())
                    .map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%project_id, count = vars.len(), "env vars replaced");
        Ok(())
    }

    fn list_env_vars(&self, project_id: &str) -> StateResult<Vec<EnvVar>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(ENV_VARS).map_err(map_err!(Table))?;
        read_children(&table, project_id)
    }

    // ── Deployments ────────────────────────────────────────────────

    fn record_deployment(
        &self,
        mut deployment: Deployment,
        project_status: ProjectStatus,
    ) -> StateResult<Deployment> {
        let project_id = deployment.project_id.clone();
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut projects = txn.open_table(PROJECTS).map_err(map_err!(Table))?;
            let mut deployments = txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;

            let mut project = read_project(&projects, &project_id)?
                .ok_or_else(|| StateError::NotFound(format!("project {project_id}")))?;

            // Next sequence = last key in this project's range + 1.
            let last_seq = {
                let (start, end) = child_range(&project_id);
                let mut range = deployments
                    .range(start.as_str()..end.as_str())
                    .map_err(map_err!(Read))?;
                match range.next_back() {
                    Some(entry) => {
                        let (_, value) = entry.map_err(map_err!(Read))?;
                        decode::<Deployment>(value.value())?.seq
                    }
                    None => 0,
                }
            };
            deployment.seq = last_seq + 1;

            let value = encode(&deployment)?;
            deployments
                .insert(
                    deployment_key(&project_id, deployment.seq).as_str(),
                    value.as_slice(),
                )
                .map_err(map_err!(Write))?;

            project.current_deployment_id = Some(deployment.id.clone());
            project.status = project_status;
            project.updated_at = epoch_secs();
            let value = encode(&project)?;
            projects
                .insert(project_id.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(
            %project_id,
            deployment_id = %deployment.id,
            seq = deployment.seq,
            status = %deployment.status,
            "deployment recorded"
        );
        Ok(deployment)
    }

    fn current_deployment(&self, project_id: &str) -> StateResult<Option<Deployment>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let projects = txn.open_table(PROJECTS).map_err(map_err!(Table))?;
        let Some(current_id) =
            read_project(&projects, project_id)?.and_then(|p| p.current_deployment_id)
        else {
            return Ok(None);
        };

        let table = txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
        let (start, end) = child_range(project_id);
        // The current deployment is almost always the newest; scan backwards.
        for entry in table
            .range(start.as_str()..end.as_str())
            .map_err(map_err!(Read))?
            .rev()
        {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let deployment: Deployment = decode(value.value())?;
            if deployment.id == current_id {
                return Ok(Some(deployment));
            }
        }
        Ok(None)
    }

    fn list_deployments(&self, project_id: &str) -> StateResult<Vec<Deployment>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
        read_children(&table, project_id)
    }
}
