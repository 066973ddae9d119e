//! Domain types for the HostGrid state store.
//!
//! Projects, their environment variables, and their deployment history.
//! Field names are camelCase on the wire (`containerID` and `deployedAt`
//! for deployments) so API responses and stored rows share one shape.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Unique identifier for a project.
pub type ProjectId = String;

/// Unique identifier for a deployment record.
pub type DeploymentId = String;

// ── Project ───────────────────────────────────────────────────────

/// A tenant's declared application.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: ProjectId,
    pub owner_id: String,
    pub name: String,
    /// Container image reference, e.g. `nginx:alpine`.
    pub image: String,
    /// Routing subdomain (a single DNS label, unique across projects).
    pub subdomain: String,
    /// Port the container listens on.
    pub port: u16,
    pub status: ProjectStatus,
    /// The deployment Start/Stop act on. Maintained by the store whenever a
    /// deployment is recorded.
    #[serde(default)]
    pub current_deployment_id: Option<DeploymentId>,
    /// Unix timestamp (seconds) when the project was created.
    pub created_at: u64,
    /// Unix timestamp (seconds) of the last change.
    pub updated_at: u64,
}

/// Lifecycle status of a project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    Created,
    Running,
    Stopped,
    Failed,
    /// The live container no longer matches the declared spec; a redeploy
    /// is required.
    Stale,
}

impl ProjectStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
            Self::Stale => "stale",
        }
    }
}

impl fmt::Display for ProjectStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Env vars ──────────────────────────────────────────────────────

/// Environment entry scoped to a project. Keys are unique per project.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EnvVar {
    pub project_id: ProjectId,
    pub key: String,
    pub value: String,
}

impl EnvVar {
    /// `KEY=VALUE`, the form container engines expect.
    pub fn to_env_string(&self) -> String {
        format!("{}={}", self.key, self.value)
    }
}

// ── Deployment ────────────────────────────────────────────────────

/// One instantiation of a project's container. Immutable once recorded.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Deployment {
    pub id: DeploymentId,
    pub project_id: ProjectId,
    /// Per-project sequence assigned by the store; defines history order.
    pub seq: u64,
    #[serde(rename = "containerID")]
    pub container_id: String,
    pub container_name: String,
    pub status: DeploymentStatus,
    /// Spec snapshot the container was created from.
    pub image: String,
    pub subdomain: String,
    pub port: u16,
    /// Unix timestamp (seconds).
    pub deployed_at: u64,
}

/// Outcome of a deployment attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStatus {
    Running,
    Stopped,
    Failed,
}

impl fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
        })
    }
}

impl Deployment {
    /// Whether the declared spec of `project` differs from what this
    /// deployment's container was created with.
    pub fn drifted_from(&self, project: &Project) -> bool {
        self.image != project.image
            || self.subdomain != project.subdomain
            || self.port != project.port
    }
}

// ── Read projections ──────────────────────────────────────────────

/// A project with its env vars and full deployment history (ascending
/// `seq`), read from a single snapshot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProjectDetail {
    #[serde(flatten)]
    pub project: Project,
    pub env_vars: Vec<EnvVar>,
    pub deployments: Vec<Deployment>,
}

impl ProjectDetail {
    pub fn current_deployment(&self) -> Option<&Deployment> {
        let id = self.project.current_deployment_id.as_deref()?;
        self.deployments.iter().find(|d| d.id == id)
    }
}

/// Current Unix epoch in seconds.
pub fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn project() -> Project {
        Project {
            id: "p1".to_string(),
            owner_id: "u1".to_string(),
            name: "Blog".to_string(),
            image: "ghost:5".to_string(),
            subdomain: "blog".to_string(),
            port: 2368,
            status: ProjectStatus::Running,
            current_deployment_id: Some("d1".to_string()),
            created_at: 1000,
            updated_at: 1000,
        }
    }

    fn deployment() -> Deployment {
        Deployment {
            id: "d1".to_string(),
            project_id: "p1".to_string(),
            seq: 1,
            container_id: "abc123".to_string(),
            container_name: "blog-1a2b3c4d".to_string(),
            status: DeploymentStatus::Running,
            image: "ghost:5".to_string(),
            subdomain: "blog".to_string(),
            port: 2368,
            deployed_at: 1000,
        }
    }

    #[test]
    fn deployment_wire_field_names() {
        let json = serde_json::to_value(deployment()).unwrap();
        assert_eq!(json["containerID"], "abc123");
        assert_eq!(json["deployedAt"], 1000);
        assert_eq!(json["status"], "running");
    }

    #[test]
    fn project_wire_field_names() {
        let json = serde_json::to_value(project()).unwrap();
        for field in ["name", "image", "subdomain", "port", "status", "ownerId"] {
            assert!(json.get(field).is_some(), "missing {field}");
        }
    }

    #[test]
    fn drift_detection() {
        let mut p = project();
        let d = deployment();
        assert!(!d.drifted_from(&p));

        p.name = "Renamed".to_string();
        assert!(!d.drifted_from(&p), "name is not part of the container spec");

        p.port = 8080;
        assert!(d.drifted_from(&p));
    }

    #[test]
    fn env_string() {
        let var = EnvVar {
            project_id: "p1".to_string(),
            key: "NODE_ENV".to_string(),
            value: "production".to_string(),
        };
        assert_eq!(var.to_env_string(), "NODE_ENV=production");
    }

    #[test]
    fn detail_flattens_project() {
        let detail = ProjectDetail {
            project: project(),
            env_vars: Vec::new(),
            deployments: vec![deployment()],
        };
        let json = serde_json::to_value(&detail).unwrap();
        assert_eq!(json["subdomain"], "blog");
        assert_eq!(json["deployments"][0]["containerID"], "abc123");
        assert_eq!(detail.current_deployment().map(|d| d.seq), Some(1));
    }
}
