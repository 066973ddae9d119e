//! In-process container engine.
//!
//! Behaves like a well-mannered Docker daemon: names are unique, start and
//! stop are idempotent, unknown ids are `NotFound`. Every call is counted
//! and faults can be queued per operation, which is what the orchestrator
//! tests lean on.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::error::{RuntimeError, RuntimeResult};
use crate::port::ContainerRuntime;
use crate::types::{ContainerInfo, ContainerSpec, ContainerState};

/// Runtime operations, for call counting and fault injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    EnsureImage,
    Create,
    Start,
    Stop,
    Remove,
    Inspect,
}

#[derive(Default)]
struct Inner {
    containers: BTreeMap<String, ContainerInfo>,
    images: BTreeSet<String>,
    unavailable_images: BTreeSet<String>,
    calls: HashMap<Op, u32>,
    /// Returned instead of performing the call.
    faults: HashMap<Op, VecDeque<RuntimeError>>,
    /// Returned after the call took effect (a lost response).
    late_faults: HashMap<Op, VecDeque<RuntimeError>>,
    next_id: u64,
    /// Applied after the call is counted and before it takes effect.
    delays: HashMap<Op, Duration>,
}

#[derive(Default)]
pub struct MemoryRuntime {
    inner: Mutex<Inner>,
}

impl MemoryRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Count the call and pop a queued up-front fault, if any.
    fn enter(inner: &mut Inner, op: Op) -> RuntimeResult<()> {
        *inner.calls.entry(op).or_default() += 1;
        match inner.faults.get_mut(&op).and_then(VecDeque::pop_front) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn leave<T>(inner: &mut Inner, op: Op, value: T) -> RuntimeResult<T> {
        match inner.late_faults.get_mut(&op).and_then(VecDeque::pop_front) {
            Some(err) => Err(err),
            None => Ok(value),
        }
    }

    fn resolve<'a>(inner: &'a mut Inner, id_or_name: &str) -> RuntimeResult<&'a mut ContainerInfo> {
        let key = if inner.containers.contains_key(id_or_name) {
            id_or_name.to_string()
        } else {
            inner
                .containers
                .values()
                .find(|c| c.name == id_or_name)
                .map(|c| c.id.clone())
                .ok_or_else(|| RuntimeError::NotFound(id_or_name.to_string()))?
        };
        inner
            .containers
            .get_mut(&key)
            .ok_or_else(|| RuntimeError::NotFound(id_or_name.to_string()))
    }

    // ── Test controls ──────────────────────────────────────────────

    /// Fail the next `op` call with `err` without performing it.
    pub fn fail_next(&self, op: Op, err: RuntimeError) {
        self.lock().faults.entry(op).or_default().push_back(err);
    }

    /// Perform the next `op` call but report `err` to the caller.
    pub fn fail_after_next(&self, op: Op, err: RuntimeError) {
        self.lock().late_faults.entry(op).or_default().push_back(err);
    }

    /// Make every pull of `image` fail.
    pub fn reject_image(&self, image: &str) {
        self.lock().unavailable_images.insert(image.to_string());
    }

    /// Delay every `op` call before it takes effect. `Duration::ZERO` clears it.
    pub fn set_delay(&self, op: Op, delay: Duration) {
        self.lock().delays.insert(op, delay);
    }

    async fn pause(&self, op: Op) {
        let delay = self.lock().delays.get(&op).copied().unwrap_or_default();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }

    /// Change a container's state behind the orchestrator's back.
    pub fn set_state(&self, id: &str, state: ContainerState) -> bool {
        match self.lock().containers.get_mut(id) {
            Some(container) => {
                container.state = state;
                true
            }
            None => false,
        }
    }

    /// Remove a container behind the orchestrator's back.
    pub fn forget(&self, id: &str) -> bool {
        self.lock().containers.remove(id).is_some()
    }

    pub fn calls(&self, op: Op) -> u32 {
        self.lock().calls.get(&op).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> u32 {
        self.lock().calls.values().sum()
    }

    pub fn containers(&self) -> Vec<ContainerInfo> {
        self.lock().containers.values().cloned().collect()
    }

    pub fn container(&self, id: &str) -> Option<ContainerInfo> {
        self.lock().containers.get(id).cloned()
    }

    pub fn running_count(&self) -> usize {
        self.lock()
            .containers
            .values()
            .filter(|c| c.state == ContainerState::Running)
            .count()
    }
}

#[async_trait]
impl ContainerRuntime for MemoryRuntime {
    async fn ensure_image(&self, image: &str) -> RuntimeResult<()> {
        let mut inner = self.lock();
        Self::enter(&mut inner, Op::EnsureImage)?;
        if inner.unavailable_images.contains(image) {
            return Err(RuntimeError::Image(format!("pull access denied for {image}")));
        }
        inner.images.insert(image.to_string());
        Self::leave(&mut inner, Op::EnsureImage, ())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> RuntimeResult<String> {
        Self::enter(&mut self.lock(), Op::Create)?;
        self.pause(Op::Create).await;

        let mut inner = self.lock();
        if !inner.images.contains(&spec.image) {
            return Err(RuntimeError::Image(format!("no such image: {}", spec.image)));
        }
        if inner.containers.values().any(|c| c.name == spec.name) {
            return Err(RuntimeError::NameConflict(spec.name.clone()));
        }
        inner.next_id += 1;
        let id = format!("mem{:012x}", inner.next_id);
        inner.containers.insert(
            id.clone(),
            ContainerInfo {
                id: id.clone(),
                name: spec.name.clone(),
                image: spec.image.clone(),
                state: ContainerState::Created,
                labels: spec.labels.clone(),
            },
        );
        debug!(name = %spec.name, %id, "memory container created");
        Self::leave(&mut inner, Op::Create, id)
    }

    async fn start_container(&self, id: &str) -> RuntimeResult<()> {
        Self::enter(&mut self.lock(), Op::Start)?;
        self.pause(Op::Start).await;

        let mut inner = self.lock();
        Self::resolve(&mut inner, id)?.state = ContainerState::Running;
        Self::leave(&mut inner, Op::Start, ())
    }

    async fn stop_container(&self, id: &str, _grace: Duration) -> RuntimeResult<()> {
        Self::enter(&mut self.lock(), Op::Stop)?;
        self.pause(Op::Stop).await;

        let mut inner = self.lock();
        let container = Self::resolve(&mut inner, id)?;
        if container.state.is_live() {
            container.state = ContainerState::Exited;
        }
        Self::leave(&mut inner, Op::Stop, ())
    }

    async fn remove_container(&self, id: &str, force: bool) -> RuntimeResult<()> {
        let mut inner = self.lock();
        Self::enter(&mut inner, Op::Remove)?;
        let container = Self::resolve(&mut inner, id)?;
        if container.state.is_live() && !force {
            return Err(RuntimeError::Engine {
                status: 409,
                message: format!("container {id} is running"),
            });
        }
        let key = container.id.clone();
        inner.containers.remove(&key);
        Self::leave(&mut inner, Op::Remove, ())
    }

    async fn inspect_container(&self, id_or_name: &str) -> RuntimeResult<ContainerInfo> {
        let mut inner = self.lock();
        Self::enter(&mut inner, Op::Inspect)?;
        let info = Self::resolve(&mut inner, id_or_name)?.clone();
        Self::leave(&mut inner, Op::Inspect, info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(name: &str) -> ContainerSpec {
        ContainerSpec {
            name: name.to_string(),
            image: "nginx:alpine".to_string(),
            env: vec!["A=1".to_string()],
            labels: BTreeMap::from([("traefik.enable".to_string(), "true".to_string())]),
            port: 80,
            network: "traefik-net".to_string(),
        }
    }

    #[tokio::test]
    async fn lifecycle() {
        let rt = MemoryRuntime::new();
        rt.ensure_image("nginx:alpine").await.unwrap();
        let id = rt.create_container(&spec("blog-1")).await.unwrap();
        assert_eq!(rt.inspect_container(&id).await.unwrap().state, ContainerState::Created);

        rt.start_container(&id).await.unwrap();
        rt.start_container(&id).await.unwrap();
        assert_eq!(rt.running_count(), 1);

        rt.stop_container(&id, Duration::from_secs(1)).await.unwrap();
        rt.stop_container(&id, Duration::from_secs(1)).await.unwrap();
        assert_eq!(
            rt.inspect_container("blog-1").await.unwrap().state,
            ContainerState::Exited
        );

        rt.remove_container(&id, false).await.unwrap();
        assert!(rt.inspect_container(&id).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn duplicate_name_conflicts() {
        let rt = MemoryRuntime::new();
        rt.ensure_image("nginx:alpine").await.unwrap();
        rt.create_container(&spec("blog-1")).await.unwrap();
        assert!(matches!(
            rt.create_container(&spec("blog-1")).await,
            Err(RuntimeError::NameConflict(_))
        ));
    }

    #[tokio::test]
    async fn create_requires_image() {
        let rt = MemoryRuntime::new();
        assert!(matches!(
            rt.create_container(&spec("blog-1")).await,
            Err(RuntimeError::Image(_))
        ));
    }

    #[tokio::test]
    async fn running_container_needs_force_to_remove() {
        let rt = MemoryRuntime::new();
        rt.ensure_image("nginx:alpine").await.unwrap();
        let id = rt.create_container(&spec("blog-1")).await.unwrap();
        rt.start_container(&id).await.unwrap();

        assert!(rt.remove_container(&id, false).await.is_err());
        rt.remove_container(&id, true).await.unwrap();
        assert!(rt.containers().is_empty());
    }

    #[tokio::test]
    async fn injected_faults_are_consumed_in_order() {
        let rt = MemoryRuntime::new();
        rt.fail_next(Op::EnsureImage, RuntimeError::Connection("refused".into()));
        assert!(rt.ensure_image("nginx:alpine").await.unwrap_err().is_transient());
        rt.ensure_image("nginx:alpine").await.unwrap();

        rt.fail_after_next(Op::Create, RuntimeError::Timeout("create".into()));
        assert!(rt.create_container(&spec("blog-1")).await.is_err());
        // The lost-response create still took effect.
        assert_eq!(rt.containers().len(), 1);
        assert_eq!(rt.calls(Op::Create), 1);
        assert_eq!(rt.calls(Op::EnsureImage), 2);
    }

    #[tokio::test]
    async fn rejected_image_fails_pull() {
        let rt = MemoryRuntime::new();
        rt.reject_image("private/app:1");
        assert!(matches!(
            rt.ensure_image("private/app:1").await,
            Err(RuntimeError::Image(_))
        ));
    }
}
