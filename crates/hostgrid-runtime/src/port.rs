//! The runtime contract consumed by the orchestrator.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::RuntimeResult;
use crate::types::{ContainerInfo, ContainerSpec};

/// Container engine operations.
///
/// Calls carry no deadline of their own; callers bound them. Start and stop
/// of a container already in the target state succeed.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Make `image` available locally, pulling it if needed.
    async fn ensure_image(&self, image: &str) -> RuntimeResult<()>;

    /// Create (not start) a container and return its id. A taken name is
    /// `NameConflict`.
    async fn create_container(&self, spec: &ContainerSpec) -> RuntimeResult<String>;

    async fn start_container(&self, id: &str) -> RuntimeResult<()>;

    /// Stop with a grace period before the engine kills the process.
    async fn stop_container(&self, id: &str, grace: Duration) -> RuntimeResult<()>;

    async fn remove_container(&self, id: &str, force: bool) -> RuntimeResult<()>;

    /// Look up a container by id or name.
    async fn inspect_container(&self, id_or_name: &str) -> RuntimeResult<ContainerInfo>;
}
