//! Per-project exclusive locks.
//!
//! Every mutating operation on a project holds that project's lock for its
//! whole duration. Operations on different projects never contend. Entries
//! are dropped from the map once nobody holds or waits on them.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type LockMap = HashMap<String, Arc<AsyncMutex<()>>>;

#[derive(Clone, Default)]
pub struct ProjectLocks {
    inner: Arc<Mutex<LockMap>>,
}

/// Held for the duration of one operation; releases on drop, including
/// when the operation future is cancelled.
pub struct ProjectGuard {
    project_id: String,
    guard: Option<OwnedMutexGuard<()>>,
    locks: Arc<Mutex<LockMap>>,
}

fn lock_map(map: &Mutex<LockMap>) -> MutexGuard<'_, LockMap> {
    map.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Remove the entry if only the map still references it.
fn prune(map: &mut LockMap, project_id: &str) {
    if map
        .get(project_id)
        .is_some_and(|entry| Arc::strong_count(entry) == 1)
    {
        map.remove(project_id);
    }
}

/// Prunes the entry when an `acquire` is dropped while still waiting.
/// After a successful acquire the guard keeps the entry alive, so this
/// is a no-op.
struct Waiting<'a> {
    locks: &'a Mutex<LockMap>,
    project_id: &'a str,
}

impl Drop for Waiting<'_> {
    fn drop(&mut self) {
        prune(&mut lock_map(self.locks), self.project_id);
    }
}

impl ProjectLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, project_id: &str) -> ProjectGuard {
        let lock = lock_map(&self.inner)
            .entry(project_id.to_string())
            .or_default()
            .clone();
        let guard = {
            let _waiting = Waiting {
                locks: &self.inner,
                project_id,
            };
            lock.lock_owned().await
        };
        ProjectGuard {
            project_id: project_id.to_string(),
            guard: Some(guard),
            locks: self.inner.clone(),
        }
    }

    /// Number of projects with a live lock entry.
    pub fn len(&self) -> usize {
        lock_map(&self.inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ProjectGuard {
    pub fn project_id(&self) -> &str {
        &self.project_id
    }
}

impl Drop for ProjectGuard {
    fn drop(&mut self) {
        let mut map = lock_map(&self.locks);
        // Unlock first so our reference doesn't count.
        drop(self.guard.take());
        prune(&mut map, &self.project_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn same_project_is_exclusive() {
        let locks = ProjectLocks::new();
        let guard = locks.acquire("p1").await;

        let waiter = tokio::time::timeout(Duration::from_millis(50), locks.acquire("p1")).await;
        assert!(waiter.is_err(), "second acquire must wait");

        drop(guard);
        let _again = tokio::time::timeout(Duration::from_millis(50), locks.acquire("p1"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn different_projects_are_independent() {
        let locks = ProjectLocks::new();
        let _a = locks.acquire("p1").await;
        let b = tokio::time::timeout(Duration::from_millis(50), locks.acquire("p2")).await;
        assert!(b.is_ok());
        assert_eq!(locks.len(), 2);
    }

    #[tokio::test]
    async fn entries_are_pruned_when_released() {
        let locks = ProjectLocks::new();
        {
            let guard = locks.acquire("p1").await;
            assert_eq!(guard.project_id(), "p1");
            assert_eq!(locks.len(), 1);
        }
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn entry_survives_while_someone_waits() {
        let locks = ProjectLocks::new();
        let first = locks.acquire("p1").await;

        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _guard = locks.acquire("p1").await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        drop(first);
        assert_eq!(locks.len(), 1, "waiter still references the entry");
        waiter.await.unwrap();
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn waiter_dropped_after_release_prunes_entry() {
        let locks = ProjectLocks::new();
        let first = locks.acquire("p1").await;

        let mut waiter = Box::pin(locks.acquire("p1"));
        let timed_out = tokio::time::timeout(Duration::from_millis(20), &mut waiter).await;
        assert!(timed_out.is_err());

        drop(first);
        assert_eq!(locks.len(), 1, "waiter still references the entry");
        drop(waiter);
        assert!(locks.is_empty());
    }
}
